//! The driver virtualizes filesystem access: everything the engine does to a
//! tree goes through a [Driver], so identical semantics hold across
//! operating systems and across real or virtual roots.

use std::io;
use std::path::{Path, PathBuf};

use crate::errors::Error;
use crate::mode::FileMode;
use crate::resource::XAttrs;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::SystemDriver;

/// Portable stat results, as reported by a driver.
///
/// `dev`, `ino`, `nlink` and `rdev` carry the platform's raw values and are
/// only meaningful to platform-specific consumers (the hardlink key and
/// device-info extraction).
#[derive(Debug, Clone, Copy)]
pub struct FileInfo {
    pub mode: FileMode,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u64,
    pub dev: u64,
    pub ino: u64,
    pub rdev: u64,
}

/// The full set of path operations the engine needs.
///
/// Optional capabilities are modeled as separate traits; a driver advertises
/// them through the probe methods, and an absent probe maps to "not
/// supported" behavior in the caller.
pub trait Driver {
    /// Opens the file at `p` for reading.
    fn open(&self, p: &Path) -> Result<Box<dyn io::Read>, Error>;

    /// Stats `p`, following symlinks.
    fn stat(&self, p: &Path) -> Result<FileInfo, Error>;

    /// Stats `p` without following symlinks.
    fn lstat(&self, p: &Path) -> Result<FileInfo, Error>;

    /// Lists the entry names of the directory at `p`, sorted lexically.
    fn read_dir(&self, p: &Path) -> Result<Vec<std::ffi::OsString>, Error>;

    /// Reads the target of the symlink at `p`.
    fn readlink(&self, p: &Path) -> Result<PathBuf, Error>;

    fn mkdir(&self, p: &Path, mode: FileMode) -> Result<(), Error>;

    /// Removes the file or empty directory at `p`.
    fn remove(&self, p: &Path) -> Result<(), Error>;

    /// Creates a hard link at `new` referring to `old`.
    fn link(&self, old: &Path, new: &Path) -> Result<(), Error>;

    /// Creates a symlink at `link` pointing at `target`.
    fn symlink(&self, target: &Path, link: &Path) -> Result<(), Error>;

    /// Changes the mode of `p` without following a final symlink.
    fn lchmod(&self, p: &Path, mode: FileMode) -> Result<(), Error>;

    /// Changes ownership of `p` without following a final symlink.
    fn lchown(&self, p: &Path, uid: u32, gid: u32) -> Result<(), Error>;

    /// Creates a device node. Fails with [Error::NotSupported] where device
    /// nodes cannot be created.
    fn mknod(&self, p: &Path, mode: FileMode, major: u64, minor: u64) -> Result<(), Error>;

    /// Creates a named pipe.
    fn mkfifo(&self, p: &Path, mode: FileMode) -> Result<(), Error>;

    /// Extended attribute support, following symlinks.
    fn xattr(&self) -> Option<&dyn XAttrDriver> {
        None
    }

    /// Extended attribute support on the link itself.
    fn lxattr(&self) -> Option<&dyn LXAttrDriver> {
        None
    }

    /// Device number extraction.
    fn device_info(&self) -> Option<&dyn DeviceInfoDriver> {
        None
    }
}

/// Extended attribute access that follows symlinks.
pub trait XAttrDriver {
    fn getxattr(&self, p: &Path) -> Result<XAttrs, Error>;

    /// Sets every attribute in `attrs`. Attributes outside the mapping are
    /// left intact; partially applied attributes are not rolled back on
    /// failure.
    fn setxattr(&self, p: &Path, attrs: &XAttrs) -> Result<(), Error>;
}

/// Extended attribute access on the symlink itself.
pub trait LXAttrDriver {
    fn lgetxattr(&self, p: &Path) -> Result<XAttrs, Error>;
    fn lsetxattr(&self, p: &Path, attrs: &XAttrs) -> Result<(), Error>;
}

/// Extraction of major/minor numbers from stat results.
pub trait DeviceInfoDriver {
    fn device_info(&self, fi: &FileInfo) -> Result<(u64, u64), Error>;
}
