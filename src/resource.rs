use nix::libc;
use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::error::{Error, Result};

/// extended attribute (name + value)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Xattr {
    pub name: String,
    pub value: Vec<u8>,
}

impl Xattr {
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// one filesystem entity in a manifest
///
/// `mode` is the full `st_mode`: permission bits plus the file-type
/// bits, which must agree with `kind`. `uid`/`gid` are textual,
/// either numeric or symbolic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub path: String,
    pub mode: u32,
    pub uid: String,
    pub gid: String,
    pub kind: ResourceKind,
}

/// kind of resource with associated payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceKind {
    /// regular file, or a whole hardlink group
    ///
    /// `hardlinks` holds the additional names of the same inode,
    /// sorted, all greater than the primary path.
    Regular {
        size: u64,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        digests: Vec<Digest>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        hardlinks: Vec<String>,
    },

    /// directory
    Directory {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        xattrs: Vec<Xattr>,
    },

    /// symbolic link; target is raw, never resolved
    Symlink { target: String },

    /// block device
    BlockDevice { major: u64, minor: u64 },

    /// character device
    CharDevice { major: u64, minor: u64 },

    /// named pipe
    Fifo,

    /// unix socket
    Socket,
}

impl ResourceKind {
    /// type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            ResourceKind::Regular { .. } => "regular",
            ResourceKind::Directory { .. } => "directory",
            ResourceKind::Symlink { .. } => "symlink",
            ResourceKind::BlockDevice { .. } => "block_device",
            ResourceKind::CharDevice { .. } => "char_device",
            ResourceKind::Fifo => "fifo",
            ResourceKind::Socket => "socket",
        }
    }

    /// the `S_IFMT` bits this kind requires in `mode`
    pub fn type_bits(&self) -> u32 {
        match self {
            ResourceKind::Regular { .. } => libc::S_IFREG,
            ResourceKind::Directory { .. } => libc::S_IFDIR,
            ResourceKind::Symlink { .. } => libc::S_IFLNK,
            ResourceKind::BlockDevice { .. } => libc::S_IFBLK,
            ResourceKind::CharDevice { .. } => libc::S_IFCHR,
            ResourceKind::Fifo => libc::S_IFIFO,
            ResourceKind::Socket => libc::S_IFSOCK,
        }
    }
}

impl Resource {
    pub fn regular(
        path: impl Into<String>,
        mode: u32,
        size: u64,
        digests: Vec<Digest>,
    ) -> Self {
        Self::new(
            path,
            mode & 0o7777 | libc::S_IFREG,
            ResourceKind::Regular {
                size,
                digests,
                hardlinks: vec![],
            },
        )
    }

    pub fn directory(path: impl Into<String>, mode: u32) -> Self {
        Self::new(
            path,
            mode & 0o7777 | libc::S_IFDIR,
            ResourceKind::Directory { xattrs: vec![] },
        )
    }

    pub fn symlink(path: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            path,
            0o777 | libc::S_IFLNK,
            ResourceKind::Symlink {
                target: target.into(),
            },
        )
    }

    pub fn block_device(path: impl Into<String>, mode: u32, major: u64, minor: u64) -> Self {
        Self::new(
            path,
            mode & 0o7777 | libc::S_IFBLK,
            ResourceKind::BlockDevice { major, minor },
        )
    }

    pub fn char_device(path: impl Into<String>, mode: u32, major: u64, minor: u64) -> Self {
        Self::new(
            path,
            mode & 0o7777 | libc::S_IFCHR,
            ResourceKind::CharDevice { major, minor },
        )
    }

    pub fn fifo(path: impl Into<String>, mode: u32) -> Self {
        Self::new(path, mode & 0o7777 | libc::S_IFIFO, ResourceKind::Fifo)
    }

    pub fn socket(path: impl Into<String>, mode: u32) -> Self {
        Self::new(path, mode & 0o7777 | libc::S_IFSOCK, ResourceKind::Socket)
    }

    fn new(path: impl Into<String>, mode: u32, kind: ResourceKind) -> Self {
        Self {
            path: path.into(),
            mode,
            uid: String::new(),
            gid: String::new(),
            kind,
        }
    }

    pub fn with_owner(mut self, uid: impl Into<String>, gid: impl Into<String>) -> Self {
        self.uid = uid.into();
        self.gid = gid.into();
        self
    }

    /// set directory xattrs, sorted by name
    pub fn with_xattrs(mut self, mut new_xattrs: Vec<Xattr>) -> Self {
        new_xattrs.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        if let ResourceKind::Directory { xattrs } = &mut self.kind {
            *xattrs = new_xattrs;
        }
        self
    }

    /// set additional hardlink paths on a regular file
    pub fn with_hardlinks(mut self, mut paths: Vec<String>) -> Self {
        paths.sort();
        if let ResourceKind::Regular { hardlinks, .. } = &mut self.kind {
            *hardlinks = paths;
        }
        self
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, ResourceKind::Directory { .. })
    }

    /// every name this resource occupies: the primary path plus any
    /// hardlink siblings
    pub fn all_paths(&self) -> impl Iterator<Item = &str> {
        let extra = match &self.kind {
            ResourceKind::Regular { hardlinks, .. } => hardlinks.as_slice(),
            _ => &[],
        };
        std::iter::once(self.path.as_str()).chain(extra.iter().map(|s| s.as_str()))
    }

    /// check that the file-type bits of `mode` agree with `kind`
    pub fn check_mode(&self) -> Result<()> {
        if self.mode & libc::S_IFMT != self.kind.type_bits() {
            return Err(Error::InvalidMode {
                path: self.path.clone(),
                mode: self.mode,
                kind: self.kind.type_name(),
            });
        }
        Ok(())
    }

    /// merge two same-path resources: `self` with metadata overridden
    /// by every non-empty field of `other`
    ///
    /// fails with `Incompatible` when the variants differ.
    pub fn merged_with(&self, other: &Resource) -> Result<Resource> {
        if std::mem::discriminant(&self.kind) != std::mem::discriminant(&other.kind) {
            return Err(Error::Incompatible {
                path: self.path.clone(),
                first: self.type_name(),
                second: other.type_name(),
            });
        }

        let mut merged = self.clone();
        if other.mode & 0o7777 != 0 {
            merged.mode = other.mode;
        }
        if !other.uid.is_empty() {
            merged.uid = other.uid.clone();
        }
        if !other.gid.is_empty() {
            merged.gid = other.gid.clone();
        }

        match (&mut merged.kind, &other.kind) {
            (
                ResourceKind::Regular {
                    size,
                    digests,
                    hardlinks,
                },
                ResourceKind::Regular {
                    size: other_size,
                    digests: other_digests,
                    hardlinks: other_hardlinks,
                },
            ) => {
                if !other_digests.is_empty() {
                    *size = *other_size;
                    *digests = other_digests.clone();
                }
                if !other_hardlinks.is_empty() {
                    *hardlinks = other_hardlinks.clone();
                }
            }
            (
                ResourceKind::Directory { xattrs },
                ResourceKind::Directory {
                    xattrs: other_xattrs,
                },
            ) => {
                if !other_xattrs.is_empty() {
                    *xattrs = other_xattrs.clone();
                }
            }
            (
                ResourceKind::Symlink { target },
                ResourceKind::Symlink {
                    target: other_target,
                },
            ) => {
                if !other_target.is_empty() {
                    *target = other_target.clone();
                }
            }
            (
                ResourceKind::BlockDevice { major, minor },
                ResourceKind::BlockDevice {
                    major: om,
                    minor: on,
                },
            )
            | (
                ResourceKind::CharDevice { major, minor },
                ResourceKind::CharDevice {
                    major: om,
                    minor: on,
                },
            ) => {
                if *om != 0 || *on != 0 {
                    *major = *om;
                    *minor = *on;
                }
            }
            _ => {}
        }

        Ok(merged)
    }
}

/// combine two regular-file resources that address the same content
/// into one hardlink group
///
/// the path lists are unioned, sorted and de-duplicated; the smallest
/// path becomes the primary.
pub fn merge_hardlinks(a: &Resource, b: &Resource) -> Result<Resource> {
    let (size, digests) = match (&a.kind, &b.kind) {
        (
            ResourceKind::Regular { size, digests, .. },
            ResourceKind::Regular {
                digests: other_digests,
                ..
            },
        ) => {
            if digests != other_digests {
                return Err(Error::Incompatible {
                    path: b.path.clone(),
                    first: "regular",
                    second: "regular",
                });
            }
            (*size, digests.clone())
        }
        _ => {
            return Err(Error::Incompatible {
                path: b.path.clone(),
                first: a.type_name(),
                second: b.type_name(),
            })
        }
    };

    let mut paths: Vec<String> = a
        .all_paths()
        .chain(b.all_paths())
        .map(str::to_string)
        .collect();
    paths.sort();
    paths.dedup();

    let primary = paths.remove(0);
    Ok(Resource {
        path: primary,
        mode: a.mode,
        uid: a.uid.clone(),
        gid: a.gid.clone(),
        kind: ResourceKind::Regular {
            size,
            digests,
            hardlinks: paths,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Algorithm;

    fn digest(data: &[u8]) -> Digest {
        Digest::from_bytes(Algorithm::Sha256, data)
    }

    #[test]
    fn test_constructors_set_type_bits() {
        assert!(Resource::regular("f", 0o644, 0, vec![]).check_mode().is_ok());
        assert!(Resource::directory("d", 0o755).check_mode().is_ok());
        assert!(Resource::symlink("l", "/t").check_mode().is_ok());
        assert!(Resource::char_device("c", 0o600, 1, 3).check_mode().is_ok());
        assert!(Resource::block_device("b", 0o660, 8, 0).check_mode().is_ok());
        assert!(Resource::fifo("p", 0o644).check_mode().is_ok());
        assert!(Resource::socket("s", 0o755).check_mode().is_ok());
    }

    #[test]
    fn test_check_mode_rejects_mismatch() {
        let mut r = Resource::regular("f", 0o644, 0, vec![]);
        r.mode = 0o644 | libc::S_IFDIR;
        assert!(matches!(r.check_mode(), Err(Error::InvalidMode { .. })));
    }

    #[test]
    fn test_all_paths() {
        let r = Resource::regular("x/a", 0o644, 5, vec![digest(b"hello")])
            .with_hardlinks(vec!["x/b".to_string()]);
        let paths: Vec<_> = r.all_paths().collect();
        assert_eq!(paths, vec!["x/a", "x/b"]);
    }

    #[test]
    fn test_merged_with_overrides_metadata() {
        let lower = Resource::directory("d", 0o755)
            .with_owner("0", "0")
            .with_xattrs(vec![Xattr::new("user.keep", b"1".to_vec())]);
        let upper = Resource::directory("d", 0o700).with_owner("1000", "");

        let merged = lower.merged_with(&upper).unwrap();
        assert_eq!(merged.mode & 0o7777, 0o700);
        assert_eq!(merged.uid, "1000");
        assert_eq!(merged.gid, "0"); // empty gid does not override
        // empty upper xattrs do not override
        assert!(matches!(
            &merged.kind,
            ResourceKind::Directory { xattrs } if xattrs.len() == 1
        ));
    }

    #[test]
    fn test_merged_with_incompatible_variants() {
        let file = Resource::regular("p", 0o644, 0, vec![]);
        let dir = Resource::directory("p", 0o755);
        assert!(matches!(
            file.merged_with(&dir),
            Err(Error::Incompatible { .. })
        ));
    }

    #[test]
    fn test_merge_hardlinks_unions_paths() {
        let d = digest(b"hello");
        let a = Resource::regular("x/b", 0o644, 5, vec![d.clone()]);
        let b = Resource::regular("x/a", 0o644, 5, vec![d.clone()]);

        let merged = merge_hardlinks(&a, &b).unwrap();
        assert_eq!(merged.path, "x/a");
        assert!(matches!(
            &merged.kind,
            ResourceKind::Regular { hardlinks, .. } if hardlinks == &["x/b".to_string()]
        ));
    }

    #[test]
    fn test_merge_hardlinks_dedups() {
        let d = digest(b"hello");
        let a = Resource::regular("x/a", 0o644, 5, vec![d.clone()])
            .with_hardlinks(vec!["x/b".to_string()]);
        let b = Resource::regular("x/b", 0o644, 5, vec![d.clone()]);

        let merged = merge_hardlinks(&a, &b).unwrap();
        let paths: Vec<_> = merged.all_paths().collect();
        assert_eq!(paths, vec!["x/a", "x/b"]);
    }

    #[test]
    fn test_merge_hardlinks_rejects_different_content() {
        let a = Resource::regular("x/a", 0o644, 5, vec![digest(b"hello")]);
        let b = Resource::regular("x/b", 0o644, 5, vec![digest(b"world")]);
        assert!(merge_hardlinks(&a, &b).is_err());
    }

    #[test]
    fn test_kind_cbor_roundtrip() {
        let r = Resource::regular("a/f", 0o600, 12, vec![digest(b"x")])
            .with_owner("0", "0");
        let mut bytes = Vec::new();
        ciborium::into_writer(&r, &mut bytes).unwrap();
        let back: Resource = ciborium::from_reader(&bytes[..]).unwrap();
        assert_eq!(r, back);
    }
}
