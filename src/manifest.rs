use std::collections::HashSet;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::paths;
use crate::resource::{Resource, ResourceKind};

/// current manifest format version
pub const MANIFEST_VERSION: u32 = 1;

/// a canonical, totally-ordered description of a filesystem tree
///
/// immutable after construction; builders, mergers and differs
/// produce new manifests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Manifest {
    version: u32,
    resources: Vec<Resource>,
}

impl Manifest {
    /// build a manifest from resources, normalizing and validating
    ///
    /// resources are sorted into plain path order and each hardlink
    /// group is normalized so its primary path is the smallest name.
    /// all data-model invariants are checked: path validity, global
    /// path uniqueness, parents present as directories, digest
    /// presence for non-empty files, and mode/kind agreement.
    pub fn new(resources: Vec<Resource>) -> Result<Self> {
        let mut resources: Vec<Resource> =
            resources.into_iter().map(normalize_hardlinks).collect();

        for resource in &resources {
            for path in resource.all_paths() {
                paths::validate(path)?;
            }
            resource.check_mode()?;
            match &resource.kind {
                ResourceKind::Regular { size, digests, .. } => {
                    if *size > 0 && digests.is_empty() {
                        return Err(Error::MissingDigest(resource.path.clone()));
                    }
                }
                ResourceKind::Directory { xattrs } => {
                    for xattr in xattrs {
                        if xattr.name.is_empty() || xattr.name.contains('\0') {
                            return Err(Error::InvalidXattrName {
                                path: resource.path.clone(),
                                name: xattr.name.clone(),
                            });
                        }
                    }
                }
                _ => {}
            }
        }

        resources.sort_by(|a, b| paths::compare(&a.path, &b.path));

        let mut all_paths: Vec<&str> = resources.iter().flat_map(Resource::all_paths).collect();
        all_paths.sort_unstable();
        for window in all_paths.windows(2) {
            if window[0] == window[1] {
                return Err(Error::DuplicatePath(window[0].to_string()));
            }
        }

        let directories: HashSet<&str> = resources
            .iter()
            .filter(|r| r.is_directory())
            .map(|r| r.path.as_str())
            .collect();
        for resource in &resources {
            for path in resource.all_paths() {
                if let Some(parent) = paths::parent(path) {
                    if !directories.contains(parent) {
                        return Err(Error::MissingParent(path.to_string()));
                    }
                }
            }
        }

        Ok(Self {
            version: MANIFEST_VERSION,
            resources,
        })
    }

    /// manifest with no resources
    pub fn empty() -> Self {
        Self {
            version: MANIFEST_VERSION,
            resources: vec![],
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn into_resources(self) -> Vec<Resource> {
        self.resources
    }

    /// look up a resource by primary path
    pub fn get(&self, path: &str) -> Option<&Resource> {
        self.resources
            .binary_search_by(|r| paths::compare(&r.path, path))
            .ok()
            .map(|i| &self.resources[i])
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// re-pick the primary path of a hardlink group as its smallest name
fn normalize_hardlinks(resource: Resource) -> Resource {
    match &resource.kind {
        ResourceKind::Regular { hardlinks, .. } if !hardlinks.is_empty() => {
            let mut group: Vec<String> =
                resource.all_paths().map(str::to_string).collect();
            group.sort();
            group.dedup();
            let primary = group.remove(0);
            let mut normalized = resource;
            normalized.path = primary;
            if let ResourceKind::Regular { hardlinks, .. } = &mut normalized.kind {
                *hardlinks = group;
            }
            normalized
        }
        _ => resource,
    }
}
