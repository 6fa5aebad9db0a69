use std::fs::File;
use std::path::{Path, PathBuf};

use nix::unistd::{Gid, Group, Uid, User};

use crate::digest::{Algorithm, Digest, Hasher};
use crate::error::{Error, IoResultExt, Result};
use crate::paths;
use crate::store::ContentStore;

/// options for a path context
pub struct ContextOptions {
    /// digest algorithm for file content
    pub algorithm: Algorithm,
    /// record symbolic user/group names instead of numeric ids when
    /// they resolve
    pub resolve_names: bool,
    /// content store to ingest file bytes into while digesting
    pub store: Option<ContentStore>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Sha256,
            resolve_names: false,
            store: None,
        }
    }
}

/// path context scoped to one tree root
///
/// all manifest path arithmetic goes through here so nothing ever
/// escapes the root. the context also carries the ownership policy
/// and an optional content-store handle; it owns no other state.
pub struct Context {
    root: PathBuf,
    algorithm: Algorithm,
    resolve_names: bool,
    store: Option<ContentStore>,
}

impl Context {
    pub fn new(root: &Path) -> Result<Self> {
        Self::with_options(root, ContextOptions::default())
    }

    pub fn with_options(root: &Path, options: ContextOptions) -> Result<Self> {
        let root = root.canonicalize().with_path(root)?;
        if !root.is_dir() {
            return Err(Error::RootNotDirectory(root));
        }
        Ok(Self {
            root,
            algorithm: options.algorithm,
            resolve_names: options.resolve_names,
            store: options.store,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn store(&self) -> Option<&ContentStore> {
        self.store.as_ref()
    }

    /// absolute path for a manifest path, confined to the root
    pub fn full_path(&self, rel: &str) -> Result<PathBuf> {
        paths::validate(rel)?;
        Ok(self.root.join(rel))
    }

    /// manifest path for an absolute path under the root
    pub fn relative_path(&self, full: &Path) -> Result<String> {
        let rel = full
            .strip_prefix(&self.root)
            .map_err(|_| Error::PathOutsideRoot(full.to_path_buf()))?;
        let rel = rel
            .to_str()
            .ok_or_else(|| Error::InvalidPath(format!("non-utf8 path: {:?}", rel)))?;
        paths::validate(rel)?;
        Ok(rel.to_string())
    }

    /// digest a file's content, ingesting it into the store when one
    /// is attached
    pub fn ingest_file(&self, path: &Path) -> Result<Digest> {
        let mut file = File::open(path).with_path(path)?;
        match &self.store {
            Some(store) => store.put(&mut file),
            None => {
                let mut hasher = Hasher::new(self.algorithm);
                std::io::copy(&mut file, &mut hasher).with_path(path)?;
                Ok(hasher.finalize())
            }
        }
    }

    /// textual owner pair for recorded ids, per the naming policy
    pub fn owner_strings(&self, uid: u32, gid: u32) -> (String, String) {
        if !self.resolve_names {
            return (uid.to_string(), gid.to_string());
        }

        let user = User::from_uid(Uid::from_raw(uid))
            .ok()
            .flatten()
            .map(|u| u.name)
            .unwrap_or_else(|| uid.to_string());
        let group = Group::from_gid(Gid::from_raw(gid))
            .ok()
            .flatten()
            .map(|g| g.name)
            .unwrap_or_else(|| gid.to_string());
        (user, group)
    }

    /// resolve a textual owner pair back to numeric ids
    ///
    /// numeric strings parse directly, anything else goes through the
    /// user/group database. empty strings mean the current effective
    /// ids.
    pub fn lookup_owner(&self, uid: &str, gid: &str) -> Result<(u32, u32)> {
        let uid = if uid.is_empty() {
            nix::unistd::geteuid().as_raw()
        } else if let Ok(n) = uid.parse::<u32>() {
            n
        } else {
            User::from_name(uid)
                .ok()
                .flatten()
                .map(|u| u.uid.as_raw())
                .ok_or_else(|| Error::UnknownUser(uid.to_string()))?
        };

        let gid = if gid.is_empty() {
            nix::unistd::getegid().as_raw()
        } else if let Ok(n) = gid.parse::<u32>() {
            n
        } else {
            Group::from_name(gid)
                .ok()
                .flatten()
                .map(|g| g.gid.as_raw())
                .ok_or_else(|| Error::UnknownGroup(gid.to_string()))?
        };

        Ok((uid, gid))
    }
}
