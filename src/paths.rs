//! manifest path arithmetic and ordering
//!
//! paths are root-relative, `/`-separated, never empty and never
//! absolute. two total orders exist: the plain byte order every
//! canonical manifest is sorted by, and the AUFS order used only when
//! iterating an upper layer, which surfaces whiteout markers before
//! the sibling entries they mask.

use std::cmp::Ordering;

use crate::error::{Error, Result};

/// prefix marking an AUFS whiteout file
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// file name marking an AUFS opaque directory
pub const OPAQUE_MARKER: &str = ".wh..wh..opq";

/// xattr carried by an opaque directory in an overlay upper layer
pub const OVERLAY_OPAQUE_XATTR: &str = "trusted.overlay.opaque";

/// reserved name for encoded manifest files; never walked
pub const MANIFEST_FILENAME: &str = ".continuity";

/// validate a manifest path
pub fn validate(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::InvalidPath("empty path".to_string()));
    }
    if path.starts_with('/') {
        return Err(Error::InvalidPath(format!("absolute path: {}", path)));
    }
    if path.ends_with('/') {
        return Err(Error::InvalidPath(format!("trailing slash: {}", path)));
    }
    if path.contains('\0') {
        return Err(Error::InvalidPath(format!("path contains null byte: {}", path)));
    }
    for segment in path.split('/') {
        if segment.is_empty() {
            return Err(Error::InvalidPath(format!("empty segment: {}", path)));
        }
        if segment == "." || segment == ".." {
            return Err(Error::InvalidPath(format!("traversal segment: {}", path)));
        }
    }
    Ok(())
}

/// parent directory of a path, None at the root
pub fn parent(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(dir, _)| dir)
}

/// final path component
pub fn base_name(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, base)| base)
}

/// true when `path` lies strictly below `ancestor`
pub fn is_descendant(path: &str, ancestor: &str) -> bool {
    path.len() > ancestor.len() + 1
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

/// plain path order: byte-wise comparison of the full path
///
/// a parent is a strict prefix of its children, so this keeps every
/// directory before everything inside it.
pub fn compare(a: &str, b: &str) -> Ordering {
    a.as_bytes().cmp(b.as_bytes())
}

/// true for `.wh.<base>` whiteout names (the opaque marker is not a
/// whiteout)
pub fn is_whiteout_name(name: &str) -> bool {
    name != OPAQUE_MARKER && name.len() > WHITEOUT_PREFIX.len() && name.starts_with(WHITEOUT_PREFIX)
}

/// the path masked by a whiteout file path, e.g. `d/.wh.e` masks `d/e`
pub fn whiteout_target(path: &str) -> Option<String> {
    let base = base_name(path);
    if !is_whiteout_name(base) {
        return None;
    }
    let masked = &base[WHITEOUT_PREFIX.len()..];
    Some(match parent(path) {
        Some(dir) => format!("{}/{}", dir, masked),
        None => masked.to_string(),
    })
}

fn aufs_rank(name: &str) -> u8 {
    if name == OPAQUE_MARKER {
        1
    } else if is_whiteout_name(name) {
        0
    } else {
        2
    }
}

/// AUFS path order
///
/// directory-local reordering: within one directory, whiteouts come
/// first (byte order), then the opaque marker, then everything else
/// in byte order. recursion keeps a directory's entries contiguous
/// behind it. a trailing slash is tolerated so directory paths in
/// either spelling compare the same.
pub fn compare_aufs(a: &str, b: &str) -> Ordering {
    let mut left = a.split('/').filter(|c| !c.is_empty());
    let mut right = b.split('/').filter(|c| !c.is_empty());

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                if x == y {
                    continue;
                }
                return aufs_rank(x)
                    .cmp(&aufs_rank(y))
                    .then_with(|| x.as_bytes().cmp(y.as_bytes()));
            }
        }
    }
}
