use std::path::Path;

use walkdir::WalkDir;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::fs::{read_symlink_target, read_xattrs, FileMetadata, FileType, HardlinkCoalescer};
use crate::manifest::Manifest;
use crate::paths;
use crate::resource::{merge_hardlinks, Resource, ResourceKind};

/// build a canonical manifest from the context's root
///
/// walks the tree depth-first without following symlinks, classifies
/// every entry, digests regular-file content (ingesting it into the
/// context's store when one is attached), and coalesces hardlink
/// groups by `(device, inode)`. any stat, read or digest failure
/// aborts the walk.
pub fn build(ctx: &Context) -> Result<Manifest> {
    let mut resources: Vec<Resource> = Vec::new();
    let mut links = HardlinkCoalescer::new();

    let walker = WalkDir::new(ctx.root())
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(walk_error)?;
        let meta = FileMetadata::from_std_metadata(&entry.metadata().map_err(walk_error)?)?;

        // manifest descriptors are reserved and never walked
        if meta.file_type == FileType::Regular
            && entry.file_name().to_str() == Some(paths::MANIFEST_FILENAME)
        {
            continue;
        }

        let rel = ctx.relative_path(entry.path())?;

        // later sightings of a known inode only add a name
        if meta.in_hardlink_group() {
            if let Some(index) = links.get(meta.dev, meta.ino) {
                let mut duplicate = resources[index].clone();
                duplicate.path = rel;
                if let ResourceKind::Regular { hardlinks, .. } = &mut duplicate.kind {
                    hardlinks.clear();
                }
                let group = merge_hardlinks(&resources[index], &duplicate)?;
                resources[index] = group;
                continue;
            }
        }

        let (uid, gid) = ctx.owner_strings(meta.uid, meta.gid);
        let resource = match meta.file_type {
            FileType::Regular => {
                let digest = ctx.ingest_file(entry.path())?;
                if meta.in_hardlink_group() {
                    links.insert(meta.dev, meta.ino, resources.len());
                }
                Resource::regular(rel, meta.mode, meta.size, vec![digest])
            }

            FileType::Directory => {
                let xattrs = read_xattrs(entry.path())?;
                Resource::directory(rel, meta.mode).with_xattrs(xattrs)
            }

            FileType::Symlink => {
                let target = read_symlink_target(entry.path())?;
                let mut resource = Resource::symlink(rel, target);
                resource.mode = meta.mode;
                resource
            }

            FileType::BlockDevice => {
                Resource::block_device(rel, meta.mode, meta.rdev.0, meta.rdev.1)
            }

            FileType::CharDevice => {
                Resource::char_device(rel, meta.mode, meta.rdev.0, meta.rdev.1)
            }

            FileType::Fifo => Resource::fifo(rel, meta.mode),

            FileType::Socket => Resource::socket(rel, meta.mode),
        };

        resources.push(resource.with_owner(uid, gid));
    }

    Manifest::new(resources)
}

fn walk_error(err: walkdir::Error) -> Error {
    let path = err
        .path()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    match err.into_io_error() {
        Some(source) => Error::Io { path, source },
        None => Error::Io {
            path,
            source: std::io::Error::other("filesystem loop"),
        },
    }
}
