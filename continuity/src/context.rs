//! A sandboxed root directory: resource construction, verification and
//! application all go through a [Context], which guarantees that no path nor
//! resolved symlink target refers outside its root.

use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::cleanpath;
use crate::digest::{digest_reader, digests_match, Digest};
#[cfg(unix)]
use crate::driver::SystemDriver;
use crate::driver::{Driver, FileInfo};
use crate::errors::{Error, VerifyError};
use crate::names;
use crate::resource::{Base, Device, Directory, NamedPipe, RegularFile, Resource, Symlink, XAttrs};

/// How Apply rewrites absolute symlink targets (targets beginning with `/`,
/// which are rooted at the manifest root, not the host root).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SymlinkPolicy {
    /// Link to the target's location under the context root.
    #[default]
    Absolute,
    /// Re-express the target relative to the link's directory.
    Relative,
    /// Pass the target through unchanged, for trees entered via chroot.
    Chroot,
}

pub struct ContextOptions {
    pub driver: Box<dyn Driver>,
    pub symlink_policy: SymlinkPolicy,
}

#[cfg(unix)]
impl Default for ContextOptions {
    fn default() -> ContextOptions {
        ContextOptions {
            driver: Box::new(SystemDriver),
            symlink_policy: SymlinkPolicy::default(),
        }
    }
}

/// A root directory bound to a driver and a symlink policy.
pub struct Context {
    driver: Box<dyn Driver>,
    root: PathBuf,
    symlink_policy: SymlinkPolicy,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("root", &self.root)
            .field("symlink_policy", &self.symlink_policy)
            .finish()
    }
}

impl Context {
    /// Binds `root` with the default driver and symlink policy.
    #[cfg(unix)]
    pub fn new(root: impl AsRef<Path>) -> Result<Context, Error> {
        Context::with_options(root, ContextOptions::default())
    }

    pub fn with_options(root: impl AsRef<Path>, options: ContextOptions) -> Result<Context, Error> {
        let root = root.as_ref();
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()?.join(root)
        };
        let root_str = root.to_str().ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "context root is not valid UTF-8",
            ))
        })?;
        let root = PathBuf::from(cleanpath::clean(root_str));

        let fi = options.driver.stat(&root)?;
        if !fi.mode.is_dir() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("context root {} is not a directory", root.display()),
            )));
        }

        Ok(Context {
            driver: options.driver,
            root,
            symlink_policy: options.symlink_policy,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn root_str(&self) -> &str {
        self.root.to_str().expect("root was validated as UTF-8")
    }

    /// Produces the resource at the in-context path `p`, typically obtained
    /// through [Context::walk] or from a resource's own path. If `fi` is
    /// absent, the path is lstated through the driver.
    pub fn resource(&self, p: &str, fi: Option<&FileInfo>) -> Result<Resource, Error> {
        let fp = self.fullpath(p)?;

        let stat;
        let fi = match fi {
            Some(fi) => fi,
            None => {
                stat = self.driver.lstat(&fp)?;
                &stat
            }
        };

        let mut base = Base::new(
            cleanpath::clean(p),
            fi.mode,
            fi.uid.to_string(),
            fi.gid.to_string(),
        )?;

        match self.resolve_xattrs(&fp, fi) {
            Ok(xattrs) => base = base.with_xattrs(xattrs),
            Err(Error::NotSupported(what)) => {
                warn!(path = %fp.display(), "resolving {what} not supported");
            }
            Err(err) => return Err(err),
        }

        if fi.mode.is_regular() {
            let digest = self.digest(p)?;
            return Ok(Resource::RegularFile(RegularFile::new(
                base,
                fi.size,
                vec![digest],
            )?));
        }

        if fi.mode.is_dir() {
            return Ok(Resource::Directory(Directory::new(base)?));
        }

        if fi.mode.is_symlink() {
            let target = self.driver.readlink(&fp)?;
            let target = target.into_os_string().into_string().map_err(|t| {
                Error::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("symlink target {t:?} is not valid UTF-8"),
                ))
            })?;

            let target = if target.starts_with('/') {
                // Absolute targets are re-anchored so a leading slash means
                // "the manifest root" in the stored form.
                self.contain(Path::new(&target))?
            } else {
                let parent = fp
                    .parent()
                    .unwrap_or(&self.root)
                    .to_str()
                    .expect("full paths under a UTF-8 root are UTF-8");
                let real = cleanpath::join(parent, &target);
                if !self.contains_host_path(&real) {
                    return Err(Error::Containment { path: real });
                }
                target
            };

            return Ok(Resource::Symlink(Symlink::new(base, target)?));
        }

        if fi.mode.is_named_pipe() {
            return Ok(Resource::NamedPipe(NamedPipe::new(base)?));
        }

        if fi.mode.is_device() {
            let Some(device_driver) = self.driver.device_info() else {
                warn!(path = %fp.display(), "device extraction not supported");
                return Err(Error::NotSupported("device extraction"));
            };
            let (major, minor) = device_driver.device_info(fi)?;
            return Ok(Resource::Device(Device::new(base, major, minor)?));
        }

        // Sockets and anything else the model cannot express. Walkers treat
        // this as a skippable entry.
        warn!(path = %fp.display(), mode = %fi.mode, "unrepresentable resource");
        Err(Error::NotFound)
    }

    /// Re-derives the resource from disk and compares it field by field.
    ///
    /// Xattrs use subset semantics: every attribute listed on `resource`
    /// must be present with an identical value, extra attributes on disk are
    /// ignored.
    pub fn verify(&self, resource: &Resource) -> Result<(), Error> {
        if let Resource::Whiteout(_) = resource {
            return Err(Error::InvalidManifest(
                "whiteouts only exist in layered diffs".into(),
            ));
        }

        let target = self.resource(resource.path(), None)?;

        let rb = resource.base();
        let tb = target.base();

        if tb.path() != rb.path() {
            return Err(VerifyError::Path {
                expected: rb.path().to_owned(),
                actual: tb.path().to_owned(),
            }
            .into());
        }
        if tb.mode() != rb.mode() {
            return Err(VerifyError::Mode {
                path: rb.path().to_owned(),
                expected: rb.mode(),
                actual: tb.mode(),
            }
            .into());
        }
        if tb.uid() != rb.uid() {
            return Err(VerifyError::Uid {
                path: rb.path().to_owned(),
                expected: rb.uid().to_owned(),
                actual: tb.uid().to_owned(),
            }
            .into());
        }
        if tb.gid() != rb.gid() {
            return Err(VerifyError::Gid {
                path: rb.path().to_owned(),
                expected: rb.gid().to_owned(),
                actual: tb.gid().to_owned(),
            }
            .into());
        }

        for (name, value) in rb.xattrs() {
            match tb.xattrs().get(name) {
                None => {
                    return Err(VerifyError::XAttrMissing {
                        path: rb.path().to_owned(),
                        name: name.clone(),
                    }
                    .into())
                }
                Some(actual) if actual != value => {
                    return Err(VerifyError::XAttrValue {
                        path: rb.path().to_owned(),
                        name: name.clone(),
                    }
                    .into())
                }
                Some(_) => {}
            }
        }

        match (resource, &target) {
            (Resource::RegularFile(r), Resource::RegularFile(t)) => {
                if r.base().paths().len() > 1 {
                    return Err(Error::NotSupported("hardlink group verification"));
                }
                if t.size() != r.size() {
                    return Err(VerifyError::Size {
                        path: rb.path().to_owned(),
                        expected: r.size(),
                        actual: t.size(),
                    }
                    .into());
                }
                if !digests_match(t.digests(), r.digests()) {
                    return Err(VerifyError::Digest {
                        path: rb.path().to_owned(),
                    }
                    .into());
                }
            }
            (Resource::Symlink(l), Resource::Symlink(t)) => {
                if t.target() != l.target() {
                    return Err(VerifyError::Target {
                        path: rb.path().to_owned(),
                        expected: l.target().to_owned(),
                        actual: t.target().to_owned(),
                    }
                    .into());
                }
            }
            (Resource::Directory(_), Resource::Directory(_))
            | (Resource::NamedPipe(_), Resource::NamedPipe(_))
            | (Resource::Device(_), Resource::Device(_)) => {}
            _ => {
                return Err(VerifyError::Kind {
                    path: rb.path().to_owned(),
                    expected: resource.kind(),
                }
                .into())
            }
        }

        Ok(())
    }

    /// Materializes the resource onto disk.
    ///
    /// Regular file contents are supplied out of band: the primary path must
    /// already exist, and only hardlink aliases, metadata and xattrs are
    /// created here.
    pub fn apply(&self, resource: &Resource) -> Result<(), Error> {
        if let Resource::Whiteout(_) = resource {
            return Err(Error::InvalidManifest(
                "whiteouts only exist in layered diffs".into(),
            ));
        }

        let fp = self.fullpath(resource.path())?;

        let mut exists = match self.driver.lstat(&fp) {
            Ok(_) => true,
            Err(Error::NotFound) => false,
            Err(err) => return Err(err),
        };
        let mut chmod = true;

        match resource {
            Resource::RegularFile(r) => {
                if !exists {
                    return Err(Error::NotFound);
                }

                for path in r.base().paths() {
                    if path == resource.path() {
                        continue;
                    }
                    let lp = self.fullpath(path)?;
                    match self.driver.lstat(&lp) {
                        Ok(_) => self.driver.remove(&lp)?,
                        Err(Error::NotFound) => {}
                        Err(err) => return Err(err),
                    }
                    self.driver.link(&fp, &lp)?;
                }
            }
            Resource::Directory(_) => {
                if !exists {
                    self.driver.mkdir(&fp, resource.mode())?;
                }
            }
            Resource::Symlink(l) => {
                let target = self.resolve_symlink_target(l)?;
                if exists {
                    let current = self.driver.readlink(&fp)?;
                    if current != Path::new(&target) {
                        self.driver.remove(&fp)?;
                        exists = false;
                    }
                }
                if !exists {
                    self.driver.symlink(Path::new(&target), &fp)?;
                }
                // symlink modes are ignored
                chmod = false;
            }
            Resource::NamedPipe(_) => {
                if !exists {
                    self.driver.mkfifo(&fp, resource.mode())?;
                }
            }
            Resource::Device(d) => {
                if !exists {
                    self.driver
                        .mknod(&fp, resource.mode(), d.major(), d.minor())?;
                }
            }
            Resource::Whiteout(_) => unreachable!("rejected above"),
        }

        // Entities we just created already carry their mode.
        if chmod && exists {
            self.driver.lchmod(&fp, resource.mode())?;
        }

        let uid = names::resolve_uid(resource.uid())?;
        let gid = names::resolve_gid(resource.gid())?;
        self.driver.lchown(&fp, uid, gid)?;

        // Only the listed attributes are set; attributes outside the set are
        // left intact.
        if !resource.xattrs().is_empty() {
            if matches!(resource, Resource::Symlink(_)) {
                let Some(lxattr) = self.driver.lxattr() else {
                    return Err(Error::NotSupported("symlink xattrs"));
                };
                lxattr.lsetxattr(&fp, resource.xattrs())?;
            } else {
                let Some(xattr) = self.driver.xattr() else {
                    return Err(Error::NotSupported("xattrs"));
                };
                xattr.setxattr(&fp, resource.xattrs())?;
            }
        }

        Ok(())
    }

    /// Pre-order traversal of the root through the driver. The callback
    /// receives root-contained paths; the root itself is skipped. The first
    /// error from the callback stops the walk and is returned verbatim.
    pub fn walk(&self, f: &mut dyn FnMut(&str, &FileInfo) -> Result<(), Error>) -> Result<(), Error> {
        let root = self.root.clone();
        self.walk_dir(&root, f)
    }

    fn walk_dir(
        &self,
        dir: &Path,
        f: &mut dyn FnMut(&str, &FileInfo) -> Result<(), Error>,
    ) -> Result<(), Error> {
        for name in self.driver.read_dir(dir)? {
            let fp = dir.join(&name);
            let fi = match self.driver.lstat(&fp) {
                Ok(fi) => fi,
                // vanished between readdir and lstat
                Err(Error::NotFound) => continue,
                Err(err) => return Err(err),
            };

            let contained = self.contain(&fp)?;
            f(&contained, &fi)?;

            if fi.mode.is_dir() {
                self.walk_dir(&fp, f)?;
            }
        }
        Ok(())
    }

    /// The host path for the in-context path `p`.
    pub fn fullpath(&self, p: &str) -> Result<PathBuf, Error> {
        let clean = cleanpath::clean(p);
        if !clean.starts_with('/') {
            return Err(Error::Containment { path: p.to_owned() });
        }
        if clean == "/" {
            return Ok(self.root.clone());
        }

        let full = self.root.join(&clean[1..]);
        if !full.starts_with(&self.root) {
            return Err(Error::Containment { path: p.to_owned() });
        }
        Ok(full)
    }

    /// The inverse of [Context::fullpath]: the canonical root-relative form
    /// of a host path under the root.
    pub fn contain(&self, p: &Path) -> Result<String, Error> {
        let rel = p
            .strip_prefix(&self.root)
            .map_err(|_| Error::Containment {
                path: p.display().to_string(),
            })?;
        let rel = rel.to_str().ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("path {p:?} is not valid UTF-8"),
            ))
        })?;
        Ok(cleanpath::clean(&format!("/{rel}")))
    }

    /// Whether the cleaned host path `p` stays under the root.
    fn contains_host_path(&self, p: &str) -> bool {
        let root = self.root_str();
        if root == "/" {
            return p.starts_with('/');
        }
        p == root || (p.starts_with(root) && p[root.len()..].starts_with('/'))
    }

    /// The content digest of the regular file at the in-context path `p`.
    fn digest(&self, p: &str) -> Result<Digest, Error> {
        let fp = self.fullpath(p)?;
        let mut reader = self.driver.open(&fp)?;
        Ok(digest_reader(&mut reader)?)
    }

    fn resolve_xattrs(&self, fp: &Path, fi: &FileInfo) -> Result<XAttrs, Error> {
        if fi.mode.is_regular() || fi.mode.is_dir() {
            return match self.driver.xattr() {
                Some(xattr) => xattr.getxattr(fp),
                None => Err(Error::NotSupported("xattr extraction")),
            };
        }

        if fi.mode.is_symlink() {
            return match self.driver.lxattr() {
                Some(lxattr) => lxattr.lgetxattr(fp),
                None => Err(Error::NotSupported("symlink xattr extraction")),
            };
        }

        Ok(XAttrs::new())
    }

    /// The on-disk target for a symlink resource under the configured
    /// policy. Relative targets pass through unchanged.
    fn resolve_symlink_target(&self, l: &Symlink) -> Result<String, Error> {
        let target = l.target();
        if !target.starts_with('/') {
            return Ok(target.to_owned());
        }

        match self.symlink_policy {
            SymlinkPolicy::Absolute => Ok(cleanpath::join(self.root_str(), &target[1..])),
            SymlinkPolicy::Relative => {
                let anchored = cleanpath::join(self.root_str(), &target[1..]);
                let link = cleanpath::join(self.root_str(), &l.base().path()[1..]);
                Ok(cleanpath::relative(cleanpath::parent(&link), &anchored))
            }
            SymlinkPolicy::Chroot => Ok(target.to_owned()),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn context() -> (tempfile::TempDir, Context) {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = Context::new(dir.path()).expect("context");
        (dir, ctx)
    }

    #[test]
    fn fullpath_and_contain_are_inverse() {
        let (_dir, ctx) = context();

        let fp = ctx.fullpath("/a/b").unwrap();
        assert_eq!("/a/b", ctx.contain(&fp).unwrap());
    }

    #[test]
    fn fullpath_rejects_relative_paths() {
        let (_dir, ctx) = context();
        match ctx.fullpath("a/b") {
            Err(Error::Containment { .. }) => {}
            other => panic!("expected containment error, got {other:?}"),
        }
    }

    #[test]
    fn contain_rejects_foreign_paths() {
        let (_dir, ctx) = context();
        match ctx.contain(Path::new("/definitely/not/the/root")) {
            Err(Error::Containment { .. }) => {}
            other => panic!("expected containment error, got {other:?}"),
        }
    }

    #[test]
    fn root_must_be_a_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("f");
        std::fs::write(&file, b"").expect("write");

        Context::new(&file).expect_err("file roots are rejected");
    }
}
