//! high-level operations: build, apply, diff and merge

mod apply;
mod build;
mod diff;
mod merge;

pub use apply::apply;
pub use build::build;
pub use diff::{diff, ManifestDiff, ResourceUpdate};
pub use merge::{
    merge_aufs, merge_overlay, merge_with, AufsWhiteout, OverlayWhiteout, WhiteoutChecker,
};
