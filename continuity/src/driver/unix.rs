//! The pass-through driver over the host filesystem. All platform-specific
//! behavior of the engine lives here.

use std::ffi::{CString, OsString};
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, MetadataExt};
use std::path::{Path, PathBuf};

use crate::errors::Error;
use crate::mode::FileMode;
use crate::resource::XAttrs;

use super::{DeviceInfoDriver, Driver, FileInfo, LXAttrDriver, XAttrDriver};

/// Converts a host `st_mode` into the portable layout.
pub(crate) fn mode_from_host(st_mode: u32) -> FileMode {
    let mut mode = FileMode::new(st_mode & 0o777);

    match st_mode & libc::S_IFMT as u32 {
        m if m == libc::S_IFREG as u32 => {}
        m if m == libc::S_IFDIR as u32 => mode |= FileMode::DIR,
        m if m == libc::S_IFLNK as u32 => mode |= FileMode::SYMLINK,
        m if m == libc::S_IFIFO as u32 => mode |= FileMode::NAMED_PIPE,
        m if m == libc::S_IFSOCK as u32 => mode |= FileMode::SOCKET,
        m if m == libc::S_IFBLK as u32 => mode |= FileMode::DEVICE,
        m if m == libc::S_IFCHR as u32 => mode |= FileMode::DEVICE | FileMode::CHAR_DEVICE,
        _ => mode |= FileMode::IRREGULAR,
    }

    if st_mode & libc::S_ISUID as u32 != 0 {
        mode |= FileMode::SETUID;
    }
    if st_mode & libc::S_ISGID as u32 != 0 {
        mode |= FileMode::SETGID;
    }
    if st_mode & libc::S_ISVTX as u32 != 0 {
        mode |= FileMode::STICKY;
    }

    mode
}

/// The host permission bits (including setuid/setgid/sticky) for a portable
/// mode. Type bits are the caller's concern.
pub(crate) fn perm_to_host(mode: FileMode) -> u32 {
    let mut host = mode.perm().bits();
    if mode.contains(FileMode::SETUID) {
        host |= libc::S_ISUID as u32;
    }
    if mode.contains(FileMode::SETGID) {
        host |= libc::S_ISGID as u32;
    }
    if mode.contains(FileMode::STICKY) {
        host |= libc::S_ISVTX as u32;
    }
    host
}

fn file_info(md: &fs::Metadata) -> FileInfo {
    FileInfo {
        mode: mode_from_host(md.mode()),
        size: md.size(),
        uid: md.uid(),
        gid: md.gid(),
        nlink: md.nlink(),
        dev: md.dev(),
        ino: md.ino(),
        rdev: md.rdev(),
    }
}

fn cstring(p: &Path) -> Result<CString, Error> {
    CString::new(p.as_os_str().as_bytes()).map_err(|_| {
        Error::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "path contains an interior NUL byte",
        ))
    })
}

fn check(ret: libc::c_int) -> Result<(), Error> {
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error().into())
    }
}

/// The default driver: a thin pass-through over the host filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDriver;

impl Driver for SystemDriver {
    fn open(&self, p: &Path) -> Result<Box<dyn io::Read>, Error> {
        Ok(Box::new(fs::File::open(p)?))
    }

    fn stat(&self, p: &Path) -> Result<FileInfo, Error> {
        Ok(file_info(&fs::metadata(p)?))
    }

    fn lstat(&self, p: &Path) -> Result<FileInfo, Error> {
        Ok(file_info(&fs::symlink_metadata(p)?))
    }

    fn read_dir(&self, p: &Path) -> Result<Vec<OsString>, Error> {
        let mut names = Vec::new();
        for entry in fs::read_dir(p)? {
            names.push(entry?.file_name());
        }
        names.sort();
        Ok(names)
    }

    fn readlink(&self, p: &Path) -> Result<PathBuf, Error> {
        Ok(fs::read_link(p)?)
    }

    fn mkdir(&self, p: &Path, mode: FileMode) -> Result<(), Error> {
        fs::DirBuilder::new().mode(perm_to_host(mode)).create(p)?;
        Ok(())
    }

    fn remove(&self, p: &Path) -> Result<(), Error> {
        if fs::symlink_metadata(p)?.is_dir() {
            fs::remove_dir(p)?;
        } else {
            fs::remove_file(p)?;
        }
        Ok(())
    }

    fn link(&self, old: &Path, new: &Path) -> Result<(), Error> {
        fs::hard_link(old, new)?;
        Ok(())
    }

    fn symlink(&self, target: &Path, link: &Path) -> Result<(), Error> {
        std::os::unix::fs::symlink(target, link)?;
        Ok(())
    }

    fn lchmod(&self, p: &Path, mode: FileMode) -> Result<(), Error> {
        // Linux cannot change the mode of a symlink; the engine never asks
        // for that, so a plain fchmodat suffices.
        let p = cstring(p)?;
        check(unsafe {
            libc::fchmodat(
                libc::AT_FDCWD,
                p.as_ptr(),
                perm_to_host(mode) as libc::mode_t,
                0,
            )
        })
    }

    fn lchown(&self, p: &Path, uid: u32, gid: u32) -> Result<(), Error> {
        let p = cstring(p)?;
        check(unsafe { libc::lchown(p.as_ptr(), uid as libc::uid_t, gid as libc::gid_t) })
    }

    #[cfg(target_os = "linux")]
    fn mknod(&self, p: &Path, mode: FileMode, major: u64, minor: u64) -> Result<(), Error> {
        let mut host = perm_to_host(mode);
        host |= if mode.is_char_device() {
            libc::S_IFCHR
        } else {
            libc::S_IFBLK
        };

        let p = cstring(p)?;
        let dev = libc::makedev(major as libc::c_uint, minor as libc::c_uint);
        check(unsafe { libc::mknod(p.as_ptr(), host as libc::mode_t, dev as libc::dev_t) })
    }

    #[cfg(not(target_os = "linux"))]
    fn mknod(&self, _p: &Path, _mode: FileMode, _major: u64, _minor: u64) -> Result<(), Error> {
        Err(Error::NotSupported("device nodes"))
    }

    fn mkfifo(&self, p: &Path, mode: FileMode) -> Result<(), Error> {
        let p = cstring(p)?;
        check(unsafe { libc::mkfifo(p.as_ptr(), perm_to_host(mode) as libc::mode_t) })
    }

    fn xattr(&self) -> Option<&dyn XAttrDriver> {
        #[cfg(target_os = "linux")]
        {
            Some(self)
        }
        #[cfg(not(target_os = "linux"))]
        {
            None
        }
    }

    fn lxattr(&self) -> Option<&dyn LXAttrDriver> {
        #[cfg(target_os = "linux")]
        {
            Some(self)
        }
        #[cfg(not(target_os = "linux"))]
        {
            None
        }
    }

    fn device_info(&self) -> Option<&dyn DeviceInfoDriver> {
        #[cfg(target_os = "linux")]
        {
            Some(self)
        }
        #[cfg(not(target_os = "linux"))]
        {
            None
        }
    }
}

#[cfg(target_os = "linux")]
impl DeviceInfoDriver for SystemDriver {
    fn device_info(&self, fi: &FileInfo) -> Result<(u64, u64), Error> {
        let rdev = fi.rdev as libc::dev_t;
        Ok((libc::major(rdev) as u64, libc::minor(rdev) as u64))
    }
}

#[cfg(target_os = "linux")]
mod xattrs {
    //! Raw xattr calls. Buffer sizes are queried first and the calls retried
    //! on ERANGE, since attributes can change between the two steps.

    use std::ffi::CStr;
    use std::io;
    use std::os::raw::c_char;

    use crate::errors::Error;
    use crate::resource::XAttrs;

    fn xattr_error(err: io::Error) -> Error {
        match err.raw_os_error() {
            Some(libc::ENOTSUP) => Error::NotSupported("xattrs"),
            _ => err.into(),
        }
    }

    pub(super) fn list(p: &CStr, follow: bool) -> Result<Vec<Vec<u8>>, Error> {
        let mut buf: Vec<u8> = Vec::new();
        loop {
            let n = unsafe {
                if follow {
                    libc::listxattr(p.as_ptr(), buf.as_mut_ptr() as *mut c_char, buf.len())
                } else {
                    libc::llistxattr(p.as_ptr(), buf.as_mut_ptr() as *mut c_char, buf.len())
                }
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::ERANGE) {
                    buf = Vec::new();
                    continue;
                }
                return Err(xattr_error(err));
            }

            let n = n as usize;
            if n > buf.len() {
                // first call sized the buffer; fill it on the next round
                buf = vec![0; n];
                continue;
            }

            buf.truncate(n);
            return Ok(buf
                .split(|b| *b == 0)
                .filter(|name| !name.is_empty())
                .map(|name| name.to_vec())
                .collect());
        }
    }

    pub(super) fn get(p: &CStr, name: &CStr, follow: bool) -> Result<Vec<u8>, Error> {
        let mut buf: Vec<u8> = Vec::new();
        loop {
            let n = unsafe {
                if follow {
                    libc::getxattr(
                        p.as_ptr(),
                        name.as_ptr(),
                        buf.as_mut_ptr() as *mut libc::c_void,
                        buf.len(),
                    )
                } else {
                    libc::lgetxattr(
                        p.as_ptr(),
                        name.as_ptr(),
                        buf.as_mut_ptr() as *mut libc::c_void,
                        buf.len(),
                    )
                }
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::ERANGE) {
                    buf = Vec::new();
                    continue;
                }
                return Err(xattr_error(err));
            }

            let n = n as usize;
            if n > buf.len() {
                buf = vec![0; n];
                continue;
            }

            buf.truncate(n);
            return Ok(buf);
        }
    }

    pub(super) fn set(p: &CStr, name: &CStr, value: &[u8], follow: bool) -> Result<(), Error> {
        let ret = unsafe {
            if follow {
                libc::setxattr(
                    p.as_ptr(),
                    name.as_ptr(),
                    value.as_ptr() as *const libc::c_void,
                    value.len(),
                    0,
                )
            } else {
                libc::lsetxattr(
                    p.as_ptr(),
                    name.as_ptr(),
                    value.as_ptr() as *const libc::c_void,
                    value.len(),
                    0,
                )
            }
        };
        if ret != 0 {
            return Err(xattr_error(io::Error::last_os_error()));
        }
        Ok(())
    }

    pub(super) fn get_all(p: &CStr, follow: bool) -> Result<XAttrs, Error> {
        let mut attrs = XAttrs::new();
        for name in list(p, follow)? {
            let name = String::from_utf8(name).map_err(|e| {
                Error::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("non-utf8 xattr name: {e}"),
                ))
            })?;
            let cname = std::ffi::CString::new(name.clone())
                .expect("xattr names are NUL-terminated on the wire");
            let value = get(p, &cname, follow)?;
            attrs.insert(name, value);
        }
        Ok(attrs)
    }

    pub(super) fn set_all(p: &CStr, attrs: &XAttrs, follow: bool) -> Result<(), Error> {
        for (name, value) in attrs {
            let cname = std::ffi::CString::new(name.as_str()).map_err(|_| {
                Error::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "xattr name contains an interior NUL byte",
                ))
            })?;
            set(p, &cname, value, follow)?;
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
impl XAttrDriver for SystemDriver {
    fn getxattr(&self, p: &Path) -> Result<XAttrs, Error> {
        xattrs::get_all(&cstring(p)?, true)
    }

    fn setxattr(&self, p: &Path, attrs: &XAttrs) -> Result<(), Error> {
        xattrs::set_all(&cstring(p)?, attrs, true)
    }
}

#[cfg(target_os = "linux")]
impl LXAttrDriver for SystemDriver {
    fn lgetxattr(&self, p: &Path) -> Result<XAttrs, Error> {
        xattrs::get_all(&cstring(p)?, false)
    }

    fn lsetxattr(&self, p: &Path, attrs: &XAttrs) -> Result<(), Error> {
        xattrs::set_all(&cstring(p)?, attrs, false)
    }
}
