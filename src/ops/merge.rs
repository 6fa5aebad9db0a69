//! layer merging
//!
//! combines a lower manifest with an upper (delta) manifest. the two
//! supported conventions differ only in how the upper layer spells
//! "delete this" and "hide everything inherited below this
//! directory": overlayfs uses 0:0 character devices and a
//! `trusted.overlay.opaque` xattr, AUFS uses `.wh.` marker files.
//! markers are consumed by the merge, never emitted.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::paths;
use crate::resource::{Resource, ResourceKind};

/// whiteout convention for one layer format
///
/// parameterizes the merge engine; implement it to support another
/// layer format.
pub trait WhiteoutChecker {
    /// the path masked from the lower layer, when `resource` is a
    /// whiteout marker
    fn is_whiteout(&self, resource: &Resource) -> Option<String>;

    /// the directory whose inherited children are hidden, when
    /// `resource` is an opaque marker; an empty string means the root
    fn is_opaque(&self, resource: &Resource) -> Option<String>;

    /// the resource to emit in place of an opaque marker, with marker
    /// fields stripped; None consumes the marker entirely
    fn strip_opaque(&self, resource: &Resource) -> Option<Resource>;

    /// iteration order for the upper layer
    fn compare(&self, a: &Resource, b: &Resource) -> Ordering {
        paths::compare(&a.path, &b.path)
    }
}

/// overlayfs convention: whiteouts are 0:0 character devices, opaque
/// directories carry `trusted.overlay.opaque = "y"`
pub struct OverlayWhiteout;

impl WhiteoutChecker for OverlayWhiteout {
    fn is_whiteout(&self, resource: &Resource) -> Option<String> {
        match resource.kind {
            ResourceKind::CharDevice { major: 0, minor: 0 } => Some(resource.path.clone()),
            _ => None,
        }
    }

    fn is_opaque(&self, resource: &Resource) -> Option<String> {
        match &resource.kind {
            ResourceKind::Directory { xattrs }
                if xattrs
                    .iter()
                    .any(|x| x.name == paths::OVERLAY_OPAQUE_XATTR && x.value == b"y") =>
            {
                Some(resource.path.clone())
            }
            _ => None,
        }
    }

    /// the opaque xattr is a marker, not a property: a merged output
    /// carrying it would poison a later merge
    fn strip_opaque(&self, resource: &Resource) -> Option<Resource> {
        let mut stripped = resource.clone();
        if let ResourceKind::Directory { xattrs } = &mut stripped.kind {
            xattrs.retain(|x| x.name != paths::OVERLAY_OPAQUE_XATTR);
        }
        Some(stripped)
    }
}

/// AUFS convention: `.wh.<name>` files whiteout their sibling,
/// `.wh..wh..opq` marks its directory opaque
pub struct AufsWhiteout;

impl WhiteoutChecker for AufsWhiteout {
    fn is_whiteout(&self, resource: &Resource) -> Option<String> {
        paths::whiteout_target(&resource.path)
    }

    fn is_opaque(&self, resource: &Resource) -> Option<String> {
        if paths::base_name(&resource.path) == paths::OPAQUE_MARKER {
            Some(paths::parent(&resource.path).unwrap_or("").to_string())
        } else {
            None
        }
    }

    fn strip_opaque(&self, _resource: &Resource) -> Option<Resource> {
        None
    }

    /// whiteouts and opaque markers must be observed before the
    /// sibling entries they affect
    fn compare(&self, a: &Resource, b: &Resource) -> Ordering {
        paths::compare_aufs(&a.path, &b.path)
    }
}

/// merge an overlayfs upper layer onto a lower manifest
///
/// a 0:0 character device in the lower manifest is rejected: a
/// builder never produces one from a real tree, and allowing it
/// would make the whiteout convention ambiguous.
pub fn merge_overlay(lower: &Manifest, upper: &Manifest) -> Result<Manifest> {
    let checker = OverlayWhiteout;
    for resource in lower.resources() {
        if checker.is_whiteout(resource).is_some() {
            return Err(Error::UnsupportedType(format!(
                "0:0 character device in lower layer: {}",
                resource.path
            )));
        }
    }
    merge_with(lower, upper, &checker)
}

/// merge an AUFS upper layer onto a lower manifest
pub fn merge_aufs(lower: &Manifest, upper: &Manifest) -> Result<Manifest> {
    merge_with(lower, upper, &AufsWhiteout)
}

/// merge engine shared by every whiteout convention
///
/// upper resources are walked in the checker's order, collecting
/// masked subtrees, opaque directories, and the surviving upper
/// resources. lower resources then pass through that transform:
/// dropped when replaced, whited out, or hidden by an opaque
/// directory, kept otherwise. a lower hardlink group only loses the
/// individual names that were masked or replaced. upper wins every
/// field on a path collision; its hardlink lists replace rather than
/// union.
pub fn merge_with(
    lower: &Manifest,
    upper: &Manifest,
    checker: &dyn WhiteoutChecker,
) -> Result<Manifest> {
    let mut upper_sorted: Vec<&Resource> = upper.resources().iter().collect();
    upper_sorted.sort_by(|a, b| checker.compare(a, b));

    let mut masked: Vec<String> = Vec::new();
    let mut opaque: Vec<String> = Vec::new();
    let mut occupied: HashSet<String> = HashSet::new();
    let mut replaced_nondirs: Vec<String> = Vec::new();
    let mut emitted: Vec<Resource> = Vec::new();

    for resource in upper_sorted {
        if let Some(target) = checker.is_whiteout(resource) {
            masked.push(target);
            continue;
        }

        if let Some(dir) = checker.is_opaque(resource) {
            opaque.push(dir);
            if let Some(stripped) = checker.strip_opaque(resource) {
                // the directory itself survives; unset fields fall
                // back to the lower directory's metadata
                let merged = match lower.get(&stripped.path) {
                    Some(lower_dir) if lower_dir.is_directory() => {
                        lower_dir.merged_with(&stripped)?
                    }
                    _ => stripped,
                };
                occupied.insert(merged.path.clone());
                emitted.push(merged);
            }
            continue;
        }

        for path in resource.all_paths() {
            occupied.insert(path.to_string());
        }
        if !resource.is_directory() {
            replaced_nondirs.push(resource.path.clone());
        }
        emitted.push(resource.clone());
    }

    let mut output: Vec<Resource> = Vec::new();
    for resource in lower.resources() {
        let survivors: Vec<String> = resource
            .all_paths()
            .filter(|&path| {
                !occupied.contains(path)
                    && !masked
                        .iter()
                        .any(|m| path == m.as_str() || paths::is_descendant(path, m))
                    && !opaque
                        .iter()
                        .any(|d| d.is_empty() || paths::is_descendant(path, d))
                    && !replaced_nondirs
                        .iter()
                        .any(|n| paths::is_descendant(path, n))
            })
            .map(str::to_string)
            .collect();

        if survivors.is_empty() {
            continue;
        }
        if survivors.len() == resource.all_paths().count() {
            output.push(resource.clone());
            continue;
        }

        // partially masked hardlink group: keep the surviving names
        let mut kept = resource.clone();
        let mut names = survivors;
        names.sort();
        kept.path = names.remove(0);
        if let ResourceKind::Regular { hardlinks, .. } = &mut kept.kind {
            *hardlinks = names;
        }
        output.push(kept);
    }

    output.extend(emitted);
    Manifest::new(output)
}
