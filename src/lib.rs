//! lamina - portable manifests of POSIX directory trees
//!
//! captures the structural and content state of a directory tree as
//! a canonical, content-addressed manifest, and reproduces or
//! overlays that state elsewhere.
//!
//! # Core concepts
//!
//! - **Resource**: one filesystem entity - regular file (by content
//!   digest, hardlink groups coalesced), directory, symlink, device
//!   node, fifo or socket - with mode, owner and xattrs
//! - **Manifest**: a totally-ordered list of resources with a
//!   deterministic CBOR wire encoding
//! - **Context**: a root-scoped handle providing path containment,
//!   ownership policy and optional content-store ingestion
//! - **Layer merge**: composition of a lower manifest with an upper
//!   delta under overlayfs or AUFS whiteout conventions
//!
//! # Example usage
//!
//! ```no_run
//! use lamina::{ops, Context};
//! use std::path::Path;
//!
//! // capture a tree
//! let ctx = Context::new(Path::new("/srv/rootfs")).unwrap();
//! let manifest = ops::build(&ctx).unwrap();
//!
//! // encode it for storage
//! let bytes = lamina::encode(&manifest).unwrap();
//!
//! // compare against another tree
//! let other = ops::build(&Context::new(Path::new("/srv/other")).unwrap()).unwrap();
//! let diff = ops::diff(&manifest, &other);
//! assert!(!diff.has_diff());
//! ```

mod codec;
mod config;
mod context;
mod digest;
mod error;
mod manifest;
mod resource;
mod store;

pub mod fs;
pub mod ops;
pub mod paths;

pub use codec::{decode, decode_lenient, encode};
pub use config::{home_dir, Config};
pub use context::{Context, ContextOptions};
pub use digest::{Algorithm, Digest, Hasher};
pub use error::{Error, Result};
pub use manifest::{Manifest, MANIFEST_VERSION};
pub use resource::{merge_hardlinks, Resource, ResourceKind, Xattr};
pub use store::{ContentProvider, ContentStore};
