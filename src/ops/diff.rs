use crate::manifest::Manifest;
use crate::paths;
use crate::resource::Resource;

/// one resource changed between two manifests
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceUpdate {
    pub original: Resource,
    pub updated: Resource,
}

/// difference between two manifests
///
/// each list preserves the plain path order of the compared
/// manifests.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManifestDiff {
    pub additions: Vec<Resource>,
    pub deletions: Vec<Resource>,
    pub updates: Vec<ResourceUpdate>,
}

impl ManifestDiff {
    pub fn has_diff(&self) -> bool {
        !self.additions.is_empty() || !self.deletions.is_empty() || !self.updates.is_empty()
    }
}

/// compare two manifests with a single linear merge over their
/// sorted resource lists
///
/// a path present only in `new` is an addition, only in `old` a
/// deletion, and in both with any differing field an update carrying
/// both sides. equality covers every field: mode, owner, digests,
/// hardlink names, xattrs, targets and device numbers.
pub fn diff(old: &Manifest, new: &Manifest) -> ManifestDiff {
    let old_resources = old.resources();
    let new_resources = new.resources();
    let mut result = ManifestDiff::default();

    let (mut i, mut j) = (0, 0);
    while i < old_resources.len() && j < new_resources.len() {
        let original = &old_resources[i];
        let updated = &new_resources[j];

        match paths::compare(&original.path, &updated.path) {
            std::cmp::Ordering::Less => {
                result.deletions.push(original.clone());
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                result.additions.push(updated.clone());
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                if original != updated {
                    result.updates.push(ResourceUpdate {
                        original: original.clone(),
                        updated: updated.clone(),
                    });
                }
                i += 1;
                j += 1;
            }
        }
    }

    result
        .deletions
        .extend(old_resources[i..].iter().cloned());
    result
        .additions
        .extend(new_resources[j..].iter().cloned());

    result
}
