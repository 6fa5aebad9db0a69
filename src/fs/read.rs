use std::fs::{self, Metadata};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;

use nix::libc;

use crate::error::{Error, IoResultExt, Result};
use crate::resource::Xattr;

/// file type enumeration, one variant per manifest resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
}

impl FileType {
    fn from_metadata(meta: &Metadata) -> Result<Self> {
        let ft = meta.file_type();
        if ft.is_file() {
            Ok(FileType::Regular)
        } else if ft.is_dir() {
            Ok(FileType::Directory)
        } else if ft.is_symlink() {
            Ok(FileType::Symlink)
        } else if ft.is_block_device() {
            Ok(FileType::BlockDevice)
        } else if ft.is_char_device() {
            Ok(FileType::CharDevice)
        } else if ft.is_fifo() {
            Ok(FileType::Fifo)
        } else if ft.is_socket() {
            Ok(FileType::Socket)
        } else {
            Err(Error::UnsupportedType(format!("{:?}", ft)))
        }
    }
}

/// lstat snapshot of a filesystem entry
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub file_type: FileType,
    pub uid: u32,
    pub gid: u32,
    /// full st_mode, type bits included
    pub mode: u32,
    pub size: u64,
    /// device major/minor, only meaningful for device nodes
    pub rdev: (u64, u64),
    /// (device, inode) identifies a hardlink group
    pub dev: u64,
    pub ino: u64,
    pub nlink: u64,
}

impl FileMetadata {
    /// stat a path without following symlinks
    pub fn from_path(path: &Path) -> Result<Self> {
        let meta = fs::symlink_metadata(path).with_path(path)?;
        Self::from_std_metadata(&meta)
    }

    pub fn from_std_metadata(meta: &Metadata) -> Result<Self> {
        let file_type = FileType::from_metadata(meta)?;
        let rdev = match file_type {
            FileType::BlockDevice | FileType::CharDevice => {
                let rdev = meta.rdev();
                (nix::sys::stat::major(rdev), nix::sys::stat::minor(rdev))
            }
            _ => (0, 0),
        };

        Ok(Self {
            file_type,
            uid: meta.uid(),
            gid: meta.gid(),
            mode: meta.mode(),
            size: meta.len(),
            rdev,
            dev: meta.dev(),
            ino: meta.ino(),
            nlink: meta.nlink(),
        })
    }

    /// regular files with more than one name coalesce into a group
    pub fn in_hardlink_group(&self) -> bool {
        self.file_type == FileType::Regular && self.nlink > 1
    }
}

/// read all extended attributes from a path, sorted by name
pub fn read_xattrs(path: &Path) -> Result<Vec<Xattr>> {
    let names: Vec<String> = match xattr::list(path) {
        Ok(iter) => iter.map(|n| n.to_string_lossy().into_owned()).collect(),
        Err(e) => {
            // ENOTSUP means the filesystem has no xattr support
            if e.raw_os_error() == Some(libc::ENOTSUP)
                || e.raw_os_error() == Some(libc::EOPNOTSUPP)
            {
                return Ok(vec![]);
            }
            return Err(Error::Xattr {
                path: path.to_path_buf(),
                message: format!("failed to list: {}", e),
            });
        }
    };

    let mut xattrs = Vec::with_capacity(names.len());
    for name in names {
        match xattr::get(path, &name) {
            Ok(Some(value)) => xattrs.push(Xattr::new(name, value)),
            // removed between list and get
            Ok(None) => {}
            Err(e) => {
                return Err(Error::Xattr {
                    path: path.to_path_buf(),
                    message: format!("failed to read {}: {}", name, e),
                });
            }
        }
    }

    xattrs.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
    Ok(xattrs)
}

/// read a symlink target, raw and unresolved
pub fn read_symlink_target(path: &Path) -> Result<String> {
    let target = fs::read_link(path).with_path(path)?;
    target
        .into_os_string()
        .into_string()
        .map_err(|t| Error::InvalidPath(format!("non-utf8 symlink target: {:?}", t)))
}
