use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use crate::context::Context;
use crate::digest::{Digest, Hasher};
use crate::error::{Error, IoResultExt, Result};
use crate::fs::{
    apply_metadata, create_block_device, create_char_device, create_directory, create_fifo,
    create_hardlink, create_socket, create_symlink,
};
use crate::manifest::Manifest;
use crate::resource::{Resource, ResourceKind};
use crate::store::ContentProvider;

/// recreate a manifest's tree at the context's root
///
/// resources are applied in manifest order, so every parent
/// directory materializes before its children. regular-file content
/// is staged to a temp file while re-digesting, verified, then
/// renamed into place; a failed verification removes the temp file
/// and never creates the final path. application is not
/// transactional: on error, everything applied so far remains on
/// disk.
pub fn apply(ctx: &Context, manifest: &Manifest, provider: &dyn ContentProvider) -> Result<()> {
    for resource in manifest.resources() {
        let target = ctx.full_path(&resource.path)?;
        let (uid, gid) = ctx.lookup_owner(&resource.uid, &resource.gid)?;

        match &resource.kind {
            ResourceKind::Directory { xattrs } => {
                create_directory(&target)?;
                apply_metadata(&target, uid, gid, resource.mode, xattrs)?;
            }

            ResourceKind::Regular {
                digests, hardlinks, ..
            } => {
                stage_regular(resource, &target, digests, provider)?;
                apply_metadata(&target, uid, gid, resource.mode, &[])?;
                for link in hardlinks {
                    create_hardlink(&ctx.full_path(link)?, &target)?;
                }
            }

            ResourceKind::Symlink {
                target: link_target,
            } => {
                // symlink modes are fixed; only ownership applies
                create_symlink(&target, link_target, uid, gid)?;
            }

            ResourceKind::BlockDevice { major, minor } => {
                create_block_device(&target, *major, *minor, resource.mode)?;
                apply_metadata(&target, uid, gid, resource.mode, &[])?;
            }

            ResourceKind::CharDevice { major, minor } => {
                create_char_device(&target, *major, *minor, resource.mode)?;
                apply_metadata(&target, uid, gid, resource.mode, &[])?;
            }

            ResourceKind::Fifo => {
                create_fifo(&target, resource.mode)?;
                apply_metadata(&target, uid, gid, resource.mode, &[])?;
            }

            ResourceKind::Socket => {
                create_socket(&target, resource.mode)?;
                apply_metadata(&target, uid, gid, resource.mode, &[])?;
            }
        }
    }

    Ok(())
}

/// write file content next to its destination, verify, rename
fn stage_regular(
    resource: &Resource,
    target: &Path,
    digests: &[Digest],
    provider: &dyn ContentProvider,
) -> Result<()> {
    if let Ok(meta) = fs::symlink_metadata(target) {
        if meta.is_dir() {
            return Err(Error::Exists {
                path: target.to_path_buf(),
                expected: "regular",
            });
        }
    }

    let parent = target.parent().unwrap_or(Path::new("."));
    let tmp_path = parent.join(format!(".lamina.{}", uuid::Uuid::new_v4()));

    let staged = (|| -> Result<()> {
        let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;

        if let Some(expected) = digests.first() {
            let mut reader = provider.open(expected)?;
            let mut hasher = Hasher::new(expected.algorithm());
            let mut buf = [0u8; 64 * 1024];
            loop {
                let n = reader.read(&mut buf).with_path(&tmp_path)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                tmp_file.write_all(&buf[..n]).with_path(&tmp_path)?;
            }

            let actual = hasher.finalize();
            if actual != *expected {
                return Err(Error::DigestMismatch {
                    path: resource.path.clone(),
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
        }

        tmp_file.sync_all().with_path(&tmp_path)?;
        Ok(())
    })();

    if let Err(e) = staged {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    fs::rename(&tmp_path, target).with_path(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::os::unix::fs::{symlink, MetadataExt};
    use tempfile::tempdir;

    use crate::codec;
    use crate::context::ContextOptions;
    use crate::digest::Algorithm;
    use crate::manifest::Manifest;
    use crate::ops::build::build;
    use crate::store::ContentStore;

    /// in-memory provider for exercising the applier without a store
    struct MapProvider(HashMap<Digest, Vec<u8>>);

    impl MapProvider {
        fn new(contents: &[&[u8]]) -> Self {
            Self(
                contents
                    .iter()
                    .map(|c| (Digest::from_bytes(Algorithm::Sha256, c), c.to_vec()))
                    .collect(),
            )
        }
    }

    impl ContentProvider for MapProvider {
        fn open(&self, digest: &Digest) -> Result<Box<dyn Read>> {
            let data = self
                .0
                .get(digest)
                .ok_or_else(|| Error::ContentNotFound(digest.to_string()))?;
            Ok(Box::new(std::io::Cursor::new(data.clone())))
        }
    }

    fn digest(data: &[u8]) -> Digest {
        Digest::from_bytes(Algorithm::Sha256, data)
    }

    fn current_owner() -> (String, String) {
        (
            nix::unistd::geteuid().as_raw().to_string(),
            nix::unistd::getegid().as_raw().to_string(),
        )
    }

    #[test]
    fn test_apply_simple_tree() {
        let dir = tempdir().unwrap();
        let (uid, gid) = current_owner();

        let manifest = Manifest::new(vec![
            Resource::directory("a", 0o755).with_owner(&uid, &gid),
            Resource::regular("a/f", 0o640, 5, vec![digest(b"hello")]).with_owner(&uid, &gid),
            Resource::symlink("a/link", "f").with_owner(&uid, &gid),
        ])
        .unwrap();

        let ctx = Context::new(dir.path()).unwrap();
        let provider = MapProvider::new(&[b"hello"]);
        apply(&ctx, &manifest, &provider).unwrap();

        assert_eq!(fs::read(dir.path().join("a/f")).unwrap(), b"hello");
        assert_eq!(
            fs::metadata(dir.path().join("a/f")).unwrap().mode() & 0o777,
            0o640
        );
        assert_eq!(
            fs::read_link(dir.path().join("a/link"))
                .unwrap()
                .to_string_lossy(),
            "f"
        );
    }

    #[test]
    fn test_apply_creates_hardlinks() {
        let dir = tempdir().unwrap();
        let (uid, gid) = current_owner();

        let manifest = Manifest::new(vec![
            Resource::directory("x", 0o755).with_owner(&uid, &gid),
            Resource::regular("x/a", 0o644, 5, vec![digest(b"hello")])
                .with_owner(&uid, &gid)
                .with_hardlinks(vec!["x/b".to_string()]),
        ])
        .unwrap();

        let ctx = Context::new(dir.path()).unwrap();
        apply(&ctx, &manifest, &MapProvider::new(&[b"hello"])).unwrap();

        let a = fs::metadata(dir.path().join("x/a")).unwrap();
        let b = fs::metadata(dir.path().join("x/b")).unwrap();
        assert_eq!(a.ino(), b.ino());
        assert_eq!(fs::read(dir.path().join("x/b")).unwrap(), b"hello");
    }

    #[test]
    fn test_apply_digest_mismatch_leaves_nothing() {
        let dir = tempdir().unwrap();
        let (uid, gid) = current_owner();

        // manifest promises the zero digest, provider serves "hello"
        let zero = Digest::parse(
            "sha256:0000000000000000000000000000000000000000000000000000000000000000",
        )
        .unwrap();
        let manifest = Manifest::new(vec![
            Resource::regular("f", 0o644, 5, vec![zero.clone()]).with_owner(&uid, &gid)
        ])
        .unwrap();

        let mut contents = HashMap::new();
        contents.insert(zero, b"hello".to_vec());
        let provider = MapProvider(contents);

        let ctx = Context::new(dir.path()).unwrap();
        let result = apply(&ctx, &manifest, &provider);
        assert!(matches!(result, Err(Error::DigestMismatch { .. })));

        // neither the final path nor any temp file survives
        assert!(!dir.path().join("f").exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_apply_missing_content() {
        let dir = tempdir().unwrap();
        let (uid, gid) = current_owner();

        let manifest = Manifest::new(vec![
            Resource::regular("f", 0o644, 5, vec![digest(b"hello")]).with_owner(&uid, &gid)
        ])
        .unwrap();

        let ctx = Context::new(dir.path()).unwrap();
        let result = apply(&ctx, &manifest, &MapProvider::new(&[]));
        assert!(matches!(result, Err(Error::ContentNotFound(_))));
        assert!(!dir.path().join("f").exists());
    }

    #[test]
    fn test_apply_type_conflict() {
        let dir = tempdir().unwrap();
        let (uid, gid) = current_owner();
        fs::create_dir(dir.path().join("f")).unwrap();

        let manifest = Manifest::new(vec![
            Resource::regular("f", 0o644, 5, vec![digest(b"hello")]).with_owner(&uid, &gid)
        ])
        .unwrap();

        let ctx = Context::new(dir.path()).unwrap();
        let result = apply(&ctx, &manifest, &MapProvider::new(&[b"hello"]));
        assert!(matches!(result, Err(Error::Exists { .. })));
    }

    #[test]
    fn test_apply_empty_file_without_digest() {
        let dir = tempdir().unwrap();
        let (uid, gid) = current_owner();

        let manifest = Manifest::new(vec![
            Resource::regular("empty", 0o644, 0, vec![]).with_owner(&uid, &gid)
        ])
        .unwrap();

        let ctx = Context::new(dir.path()).unwrap();
        apply(&ctx, &manifest, &MapProvider::new(&[])).unwrap();
        assert_eq!(fs::read(dir.path().join("empty")).unwrap(), b"");
    }

    #[test]
    fn test_apply_replaces_existing_file() {
        let dir = tempdir().unwrap();
        let (uid, gid) = current_owner();
        fs::write(dir.path().join("f"), "old").unwrap();

        let manifest = Manifest::new(vec![
            Resource::regular("f", 0o644, 3, vec![digest(b"new")]).with_owner(&uid, &gid)
        ])
        .unwrap();

        let ctx = Context::new(dir.path()).unwrap();
        apply(&ctx, &manifest, &MapProvider::new(&[b"new"])).unwrap();
        assert_eq!(fs::read(dir.path().join("f")).unwrap(), b"new");
    }

    #[test]
    fn test_apply_then_build_fixpoint() {
        let dir = tempdir().unwrap();

        // source tree with every unprivileged resource kind
        let source = dir.path().join("source");
        fs::create_dir_all(source.join("a/b")).unwrap();
        fs::write(source.join("a/file"), "content one").unwrap();
        fs::write(source.join("a/b/other"), "content two").unwrap();
        fs::hard_link(source.join("a/file"), source.join("a/twin")).unwrap();
        symlink("b/other", source.join("a/link")).unwrap();
        nix::unistd::mkfifo(
            &source.join("pipe"),
            nix::sys::stat::Mode::from_bits_truncate(0o644),
        )
        .unwrap();

        let store = ContentStore::open_at(dir.path().join("store")).unwrap();
        let build_ctx = Context::with_options(
            &source,
            ContextOptions {
                store: Some(store),
                ..Default::default()
            },
        )
        .unwrap();
        let manifest = build(&build_ctx).unwrap();

        let target = dir.path().join("target");
        fs::create_dir(&target).unwrap();
        let apply_ctx = Context::new(&target).unwrap();
        let store = build_ctx.store().unwrap();
        apply(&apply_ctx, &manifest, store).unwrap();

        let rebuilt = build(&Context::new(&target).unwrap()).unwrap();
        assert_eq!(
            codec::encode(&manifest).unwrap(),
            codec::encode(&rebuilt).unwrap()
        );
    }

    #[test]
    fn test_apply_is_repeatable() {
        let dir = tempdir().unwrap();
        let (uid, gid) = current_owner();

        let manifest = Manifest::new(vec![
            Resource::directory("d", 0o755).with_owner(&uid, &gid),
            Resource::regular("d/f", 0o644, 5, vec![digest(b"hello")]).with_owner(&uid, &gid),
        ])
        .unwrap();

        let ctx = Context::new(dir.path()).unwrap();
        let provider = MapProvider::new(&[b"hello"]);
        apply(&ctx, &manifest, &provider).unwrap();
        apply(&ctx, &manifest, &provider).unwrap();

        assert_eq!(fs::read(dir.path().join("d/f")).unwrap(), b"hello");
    }
}
