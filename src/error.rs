use std::path::PathBuf;

/// error type for lamina operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid mode {mode:#o} for {kind} resource at {path}")]
    InvalidMode {
        path: String,
        mode: u32,
        kind: &'static str,
    },

    #[error("unsupported resource type: {0}")]
    UnsupportedType(String),

    #[error("duplicate path in manifest: {0}")]
    DuplicatePath(String),

    #[error("missing parent directory for {0}")]
    MissingParent(String),

    #[error("regular file without content digest: {0}")]
    MissingDigest(String),

    #[error("invalid xattr name {name:?} on {path}")]
    InvalidXattrName { path: String, name: String },

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("unknown digest algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("content not found: {0}")]
    ContentNotFound(String),

    #[error("digest mismatch at {path}: expected {expected}, got {actual}")]
    DigestMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("path exists with conflicting type at {path}: expected {expected}")]
    Exists { path: PathBuf, expected: &'static str },

    #[error("cannot merge {first} with {second} at {path}")]
    Incompatible {
        path: String,
        first: &'static str,
        second: &'static str,
    },

    #[error("path escapes root: {0}")]
    PathOutsideRoot(PathBuf),

    #[error("root is not a directory: {0}")]
    RootNotDirectory(PathBuf),

    #[error("cannot create device node without privileges: {0}")]
    DeviceNodePermission(PathBuf),

    #[error("unknown user: {0}")]
    UnknownUser(String),

    #[error("unknown group: {0}")]
    UnknownGroup(String),

    #[error("truncated manifest data: {0}")]
    Truncated(String),

    #[error("unknown field in manifest data: {0}")]
    UnknownField(String),

    #[error("unsupported manifest version: {0}")]
    UnsupportedVersion(u64),

    #[error("malformed manifest data: {0}")]
    Malformed(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cbor serialization error: {0}")]
    CborEncode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("xattr error on {path}: {message}")]
    Xattr { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
