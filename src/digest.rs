use std::fmt;
use std::io::{self, Write};

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::error::{Error, Result};

/// registered content digest algorithms
///
/// SHA-256 is the baseline every implementation must support.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Algorithm {
    #[default]
    Sha256,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "sha256" => Ok(Algorithm::Sha256),
            other => Err(Error::UnknownAlgorithm(other.to_string())),
        }
    }

    /// hex digest length for this algorithm
    pub fn hex_len(&self) -> usize {
        match self {
            Algorithm::Sha256 => 64,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// content digest in `algorithm:hex` form
///
/// hex is normalized to lowercase on parse, so equality is plain
/// string equality.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    algorithm: Algorithm,
    hex: String,
}

impl Digest {
    pub fn new(algorithm: Algorithm, bytes: &[u8]) -> Self {
        Self {
            algorithm,
            hex: hex::encode(bytes),
        }
    }

    /// parse an `algorithm:hex` string
    pub fn parse(s: &str) -> Result<Self> {
        let (name, hex_part) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidDigest(s.to_string()))?;
        let algorithm = Algorithm::from_name(name)?;
        if hex_part.len() != algorithm.hex_len()
            || !hex_part.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(Error::InvalidDigest(s.to_string()));
        }
        Ok(Self {
            algorithm,
            hex: hex_part.to_ascii_lowercase(),
        })
    }

    /// digest a byte slice in one shot
    pub fn from_bytes(algorithm: Algorithm, data: &[u8]) -> Self {
        let mut hasher = Hasher::new(algorithm);
        hasher.update(data);
        hasher.finalize()
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// split hex into object store path components (2-char shard, rest)
    pub fn to_path_components(&self) -> (String, String) {
        (self.hex[..2].to_string(), self.hex[2..].to_string())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}:{})", self.algorithm, &self.hex[..12])
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// streaming content digester
///
/// implements `io::Write` so content can be teed through it while
/// being copied elsewhere.
pub struct Hasher {
    algorithm: Algorithm,
    inner: Sha256,
}

impl Hasher {
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            inner: Sha256::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> Digest {
        Digest::new(self.algorithm, &self.inner.finalize())
    }
}

impl Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
