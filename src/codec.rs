//! canonical manifest wire format
//!
//! a manifest encodes as a single CBOR document: a map with `version`
//! and `resources`, each resource a map of named fields with its kind
//! tagged under `type`. struct fields serialize in declaration order
//! and lists keep their stored (sorted) order, so re-encoding a
//! decoded manifest reproduces the identical byte string.
//!
//! decoding is strict: unknown map keys, unknown `type` tags,
//! unsupported versions, truncated input and every data-model
//! invariant violation are errors. `decode_lenient` skips only the
//! unknown-key check, for reading documents written by a newer
//! format revision.

use ciborium::Value;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::manifest::{Manifest, MANIFEST_VERSION};
use crate::resource::Resource;

#[derive(Deserialize)]
struct RawManifest {
    version: u64,
    resources: Vec<Resource>,
}

/// encode a manifest to its canonical byte string
pub fn encode(manifest: &Manifest) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(manifest, &mut buf)?;
    Ok(buf)
}

/// decode a manifest, rejecting unknown fields
pub fn decode(data: &[u8]) -> Result<Manifest> {
    decode_inner(data, true)
}

/// decode a manifest, ignoring unknown fields
pub fn decode_lenient(data: &[u8]) -> Result<Manifest> {
    decode_inner(data, false)
}

fn decode_inner(data: &[u8], strict: bool) -> Result<Manifest> {
    let value: Value = ciborium::from_reader(data).map_err(map_decode_err)?;
    if strict {
        check_manifest_fields(&value)?;
    }

    let raw: RawManifest = ciborium::from_reader(data).map_err(map_decode_err)?;
    if raw.version != u64::from(MANIFEST_VERSION) {
        return Err(Error::UnsupportedVersion(raw.version));
    }

    Manifest::new(raw.resources)
}

fn map_decode_err(err: ciborium::de::Error<std::io::Error>) -> Error {
    match err {
        ciborium::de::Error::Io(e) => Error::Truncated(e.to_string()),
        ciborium::de::Error::RecursionLimitExceeded => {
            Error::Malformed("recursion limit exceeded".to_string())
        }
        other => Error::Malformed(other.to_string()),
    }
}

const MANIFEST_KEYS: &[&str] = &["version", "resources"];
const RESOURCE_KEYS: &[&str] = &["path", "mode", "uid", "gid", "kind"];
const XATTR_KEYS: &[&str] = &["name", "value"];

fn kind_keys(tag: &str) -> Result<&'static [&'static str]> {
    Ok(match tag {
        "regular" => &["type", "size", "digests", "hardlinks"],
        "directory" => &["type", "xattrs"],
        "symlink" => &["type", "target"],
        "block_device" | "char_device" => &["type", "major", "minor"],
        "fifo" | "socket" => &["type"],
        other => return Err(Error::UnsupportedType(other.to_string())),
    })
}

fn entries(value: &Value, what: &str) -> Result<Vec<(String, Value)>> {
    let map = value
        .as_map()
        .ok_or_else(|| Error::Malformed(format!("{} is not a map", what)))?;
    map.iter()
        .map(|(k, v)| {
            let key = k
                .as_text()
                .ok_or_else(|| Error::Malformed(format!("non-text key in {}", what)))?;
            Ok((key.to_string(), v.clone()))
        })
        .collect()
}

fn check_keys(fields: &[(String, Value)], known: &[&str]) -> Result<()> {
    for (key, _) in fields {
        if !known.contains(&key.as_str()) {
            return Err(Error::UnknownField(key.clone()));
        }
    }
    Ok(())
}

fn check_manifest_fields(value: &Value) -> Result<()> {
    let fields = entries(value, "manifest")?;
    check_keys(&fields, MANIFEST_KEYS)?;

    for (key, value) in &fields {
        if key == "resources" {
            let resources = value
                .as_array()
                .ok_or_else(|| Error::Malformed("resources is not an array".to_string()))?;
            for resource in resources {
                check_resource_fields(resource)?;
            }
        }
    }
    Ok(())
}

fn check_resource_fields(value: &Value) -> Result<()> {
    let fields = entries(value, "resource")?;
    check_keys(&fields, RESOURCE_KEYS)?;

    for (key, value) in &fields {
        if key == "kind" {
            check_kind_fields(value)?;
        }
    }
    Ok(())
}

fn check_kind_fields(value: &Value) -> Result<()> {
    let fields = entries(value, "kind")?;
    let tag = fields
        .iter()
        .find(|(key, _)| key == "type")
        .and_then(|(_, v)| v.as_text())
        .ok_or_else(|| Error::Malformed("kind without type tag".to_string()))?;
    check_keys(&fields, kind_keys(tag)?)?;

    for (key, value) in &fields {
        if key == "xattrs" {
            let xattrs = value
                .as_array()
                .ok_or_else(|| Error::Malformed("xattrs is not an array".to_string()))?;
            for xattr in xattrs {
                check_keys(&entries(xattr, "xattr")?, XATTR_KEYS)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::{Algorithm, Digest};
    use crate::resource::Xattr;

    fn digest(data: &[u8]) -> Digest {
        Digest::from_bytes(Algorithm::Sha256, data)
    }

    fn sample_manifest() -> Manifest {
        Manifest::new(vec![
            Resource::directory("a", 0o755)
                .with_owner("0", "0")
                .with_xattrs(vec![Xattr::new("user.note", b"v".to_vec())]),
            Resource::regular("a/f1", 0o600, 5, vec![digest(b"hello")]).with_owner("0", "0"),
            Resource::regular("a/f2", 0o644, 5, vec![digest(b"world")])
                .with_owner("1000", "1000")
                .with_hardlinks(vec!["a/f3".to_string()]),
            Resource::symlink("a/link", "f1").with_owner("0", "0"),
            Resource::char_device("null", 0o666, 1, 3).with_owner("0", "0"),
            Resource::fifo("pipe", 0o644).with_owner("0", "0"),
            Resource::socket("sock", 0o755).with_owner("0", "0"),
        ])
        .unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let m = sample_manifest();
        let bytes = encode(&m).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(m, decoded);
    }

    #[test]
    fn test_reencode_is_identical() {
        let m = sample_manifest();
        let bytes = encode(&m).unwrap();
        let reencoded = encode(&decode(&bytes).unwrap()).unwrap();
        assert_eq!(bytes, reencoded);
    }

    #[test]
    fn test_truncated_input() {
        let bytes = encode(&sample_manifest()).unwrap();
        let result = decode(&bytes[..bytes.len() / 2]);
        assert!(matches!(result, Err(Error::Truncated(_))));
    }

    #[test]
    fn test_garbage_input() {
        assert!(decode(b"\xff\xff\xff\xff").is_err());
    }

    fn with_extra_key(bytes: &[u8], key: &str) -> Vec<u8> {
        let mut value: Value = ciborium::from_reader(bytes).unwrap();
        if let Value::Map(fields) = &mut value {
            fields.push((Value::Text(key.to_string()), Value::Integer(7.into())));
        }
        let mut out = Vec::new();
        ciborium::into_writer(&value, &mut out).unwrap();
        out
    }

    #[test]
    fn test_unknown_field_is_strict_error() {
        let bytes = with_extra_key(&encode(&sample_manifest()).unwrap(), "later_addition");
        let result = decode(&bytes);
        assert!(
            matches!(result, Err(Error::UnknownField(ref k)) if k == "later_addition"),
            "got {:?}",
            result
        );
    }

    #[test]
    fn test_unknown_field_allowed_lenient() {
        let bytes = with_extra_key(&encode(&sample_manifest()).unwrap(), "later_addition");
        let decoded = decode_lenient(&bytes).unwrap();
        assert_eq!(decoded, sample_manifest());
    }

    #[test]
    fn test_unknown_kind_field_is_strict_error() {
        let mut value: Value =
            ciborium::from_reader(&encode(&sample_manifest()).unwrap()[..]).unwrap();
        // drill into resources[0].kind and add a stray field
        if let Value::Map(fields) = &mut value {
            for (key, v) in fields.iter_mut() {
                if key.as_text() == Some("resources") {
                    let Value::Array(resources) = v else { panic!() };
                    let Value::Map(resource) = &mut resources[0] else { panic!() };
                    for (rkey, rv) in resource.iter_mut() {
                        if rkey.as_text() == Some("kind") {
                            let Value::Map(kind) = rv else { panic!() };
                            kind.push((
                                Value::Text("sticky".to_string()),
                                Value::Bool(true),
                            ));
                        }
                    }
                }
            }
        }
        let mut bytes = Vec::new();
        ciborium::into_writer(&value, &mut bytes).unwrap();

        assert!(matches!(decode(&bytes), Err(Error::UnknownField(_))));
        assert!(decode_lenient(&bytes).is_ok());
    }

    #[test]
    fn test_unsupported_version() {
        let mut value: Value =
            ciborium::from_reader(&encode(&Manifest::empty()).unwrap()[..]).unwrap();
        if let Value::Map(fields) = &mut value {
            for (key, v) in fields.iter_mut() {
                if key.as_text() == Some("version") {
                    *v = Value::Integer(99.into());
                }
            }
        }
        let mut bytes = Vec::new();
        ciborium::into_writer(&value, &mut bytes).unwrap();

        assert!(matches!(decode(&bytes), Err(Error::UnsupportedVersion(99))));
    }

    #[test]
    fn test_unknown_type_tag() {
        let value = Value::Map(vec![
            (Value::Text("version".into()), Value::Integer(1.into())),
            (
                Value::Text("resources".into()),
                Value::Array(vec![Value::Map(vec![
                    (Value::Text("path".into()), Value::Text("f".into())),
                    (Value::Text("mode".into()), Value::Integer(0o100644.into())),
                    (Value::Text("uid".into()), Value::Text("0".into())),
                    (Value::Text("gid".into()), Value::Text("0".into())),
                    (
                        Value::Text("kind".into()),
                        Value::Map(vec![(
                            Value::Text("type".into()),
                            Value::Text("door".into()),
                        )]),
                    ),
                ])]),
            ),
        ]);
        let mut bytes = Vec::new();
        ciborium::into_writer(&value, &mut bytes).unwrap();

        assert!(matches!(
            decode(&bytes),
            Err(Error::UnsupportedType(ref t)) if t == "door"
        ));
    }

    #[test]
    fn test_decode_validates_invariants() {
        // hand-build a document whose file claims directory mode
        let value = Value::Map(vec![
            (Value::Text("version".into()), Value::Integer(1.into())),
            (
                Value::Text("resources".into()),
                Value::Array(vec![Value::Map(vec![
                    (Value::Text("path".into()), Value::Text("f".into())),
                    (Value::Text("mode".into()), Value::Integer(0o040644.into())),
                    (Value::Text("uid".into()), Value::Text("0".into())),
                    (Value::Text("gid".into()), Value::Text("0".into())),
                    (
                        Value::Text("kind".into()),
                        Value::Map(vec![
                            (Value::Text("type".into()), Value::Text("regular".into())),
                            (Value::Text("size".into()), Value::Integer(0.into())),
                        ]),
                    ),
                ])]),
            ),
        ]);
        let mut bytes = Vec::new();
        ciborium::into_writer(&value, &mut bytes).unwrap();

        assert!(matches!(decode(&bytes), Err(Error::InvalidMode { .. })));
    }

    #[test]
    fn test_empty_manifest_roundtrip() {
        let bytes = encode(&Manifest::empty()).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert!(decoded.is_empty());
    }
}
