use std::ffi::CString;
use std::fs::{self, Permissions};
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::Path;

use nix::libc;
use nix::sys::stat::{makedev, mknod, Mode, SFlag};
use nix::unistd::{chown, Gid, Uid};

use crate::error::{Error, IoResultExt, Result};
use crate::resource::Xattr;

/// create a directory if it does not exist yet
///
/// an existing directory is fine (metadata is reapplied by the
/// caller); an existing non-directory is a type conflict.
pub fn create_directory(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(Error::Exists {
            path: path.to_path_buf(),
            expected: "directory",
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            fs::create_dir(path).with_path(path)
        }
        Err(e) => Err(Error::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// create a symlink, replacing an existing non-directory entry
pub fn create_symlink(path: &Path, target: &str, uid: u32, gid: u32) -> Result<()> {
    remove_non_directory(path, "symlink")?;
    symlink(target, path).with_path(path)?;
    lchown(path, uid, gid)
}

/// create a block device node
pub fn create_block_device(path: &Path, major: u64, minor: u64, mode: u32) -> Result<()> {
    create_device_node(path, SFlag::S_IFBLK, major, minor, mode)
}

/// create a character device node
pub fn create_char_device(path: &Path, major: u64, minor: u64, mode: u32) -> Result<()> {
    create_device_node(path, SFlag::S_IFCHR, major, minor, mode)
}

/// create a named pipe
pub fn create_fifo(path: &Path, mode: u32) -> Result<()> {
    remove_non_directory(path, "fifo")?;
    nix::unistd::mkfifo(path, Mode::from_bits_truncate(mode)).map_err(|e| Error::Io {
        path: path.to_path_buf(),
        source: std::io::Error::from_raw_os_error(e as i32),
    })
}

/// create a unix socket node
///
/// nothing will be listening; the node exists so the tree matches
/// its manifest.
pub fn create_socket(path: &Path, mode: u32) -> Result<()> {
    remove_non_directory(path, "socket")?;
    mknod(
        path,
        SFlag::S_IFSOCK,
        Mode::from_bits_truncate(mode),
        makedev(0, 0),
    )
    .map_err(|e| Error::Io {
        path: path.to_path_buf(),
        source: std::io::Error::from_raw_os_error(e as i32),
    })
}

/// create a hardlink to an already materialized file
pub fn create_hardlink(link_path: &Path, target_path: &Path) -> Result<()> {
    remove_non_directory(link_path, "regular")?;
    fs::hard_link(target_path, link_path).with_path(link_path)
}

/// apply ownership, mode and xattrs to an existing path
///
/// xattrs go first while we still hold write permission, ownership is
/// skipped when it already matches the current ids so unprivileged
/// apply works, and mode goes last since it may drop write access.
pub fn apply_metadata(path: &Path, uid: u32, gid: u32, mode: u32, xattrs: &[Xattr]) -> Result<()> {
    for xattr in xattrs {
        xattr::set(path, &xattr.name, &xattr.value).map_err(|e| Error::Xattr {
            path: path.to_path_buf(),
            message: format!("failed to set {}: {}", xattr.name, e),
        })?;
    }

    let current_uid = nix::unistd::geteuid().as_raw();
    let current_gid = nix::unistd::getegid().as_raw();
    if uid != current_uid || gid != current_gid {
        chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid))).map_err(|e| Error::Io {
            path: path.to_path_buf(),
            source: std::io::Error::from_raw_os_error(e as i32),
        })?;
    }

    fs::set_permissions(path, Permissions::from_mode(mode & 0o7777)).with_path(path)
}

/// chown without following symlinks
fn lchown(path: &Path, uid: u32, gid: u32) -> Result<()> {
    let current_uid = nix::unistd::geteuid().as_raw();
    let current_gid = nix::unistd::getegid().as_raw();
    if uid == current_uid && gid == current_gid {
        return Ok(());
    }

    let c_path = CString::new(path.as_os_str().as_encoded_bytes()).map_err(|_| Error::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "path contains null byte"),
    })?;
    let ret = unsafe { libc::lchown(c_path.as_ptr(), uid, gid) };
    if ret != 0 {
        return Err(Error::Io {
            path: path.to_path_buf(),
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}

fn create_device_node(path: &Path, sflag: SFlag, major: u64, minor: u64, mode: u32) -> Result<()> {
    remove_non_directory(path, "device")?;
    mknod(
        path,
        sflag,
        Mode::from_bits_truncate(mode),
        makedev(major, minor),
    )
    .map_err(|e| {
        if e == nix::errno::Errno::EPERM {
            Error::DeviceNodePermission(path.to_path_buf())
        } else {
            Error::Io {
                path: path.to_path_buf(),
                source: std::io::Error::from_raw_os_error(e as i32),
            }
        }
    })
}

/// clear the way for a non-directory entry
///
/// an existing directory at the path is a type conflict, anything
/// else is removed.
fn remove_non_directory(path: &Path, expected: &'static str) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => Err(Error::Exists {
            path: path.to_path_buf(),
            expected,
        }),
        Ok(_) => fs::remove_file(path).with_path(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
