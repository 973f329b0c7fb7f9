//! The resource model: one tagged record per filesystem entity.

use std::collections::BTreeMap;
use std::fmt;

use bstr::ByteSlice;

use crate::cleanpath;
use crate::digest::{uniqify_digests, Digest};
use crate::errors::Error;
use crate::mode::FileMode;

/// Extended attributes, keyed by attribute name. The sorted iteration order
/// of the map is also the serialized order.
pub type XAttrs = BTreeMap<String, Vec<u8>>;

/// The header fields shared by every resource variant.
///
/// `paths` always holds at least one entry; only regular files may carry
/// more (a hardlink group). Paths are absolute, `/`-separated and lexically
/// clean, with `paths[0]` the canonical one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base {
    paths: Vec<String>,
    mode: FileMode,
    uid: String,
    gid: String,
    xattrs: XAttrs,
}

fn validate_path(p: &str) -> Result<(), Error> {
    if !cleanpath::is_clean_manifest_path(p) {
        return Err(Error::InvalidManifest(format!(
            "path {p:?} is not clean and absolute"
        )));
    }
    Ok(())
}

impl Base {
    pub fn new(
        path: impl Into<String>,
        mode: FileMode,
        uid: impl Into<String>,
        gid: impl Into<String>,
    ) -> Result<Base, Error> {
        let path = path.into();
        validate_path(&path)?;
        Ok(Base {
            paths: vec![path],
            mode,
            uid: uid.into(),
            gid: gid.into(),
            xattrs: XAttrs::new(),
        })
    }

    /// Builds a header for a hardlink group. `paths` must be non-empty,
    /// clean, sorted and free of duplicates.
    pub fn with_paths(
        paths: Vec<String>,
        mode: FileMode,
        uid: impl Into<String>,
        gid: impl Into<String>,
    ) -> Result<Base, Error> {
        if paths.is_empty() {
            return Err(Error::InvalidManifest("resource has no paths".into()));
        }
        for p in &paths {
            validate_path(p)?;
        }
        if !paths.windows(2).all(|w| w[0] < w[1]) {
            return Err(Error::InvalidManifest(format!(
                "paths {paths:?} are not sorted and unique"
            )));
        }
        Ok(Base {
            paths,
            mode,
            uid: uid.into(),
            gid: gid.into(),
            xattrs: XAttrs::new(),
        })
    }

    pub fn with_xattrs(mut self, xattrs: XAttrs) -> Base {
        self.xattrs = xattrs;
        self
    }

    /// The canonical (lexically smallest) path.
    pub fn path(&self) -> &str {
        &self.paths[0]
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn gid(&self) -> &str {
        &self.gid
    }

    pub fn xattrs(&self) -> &XAttrs {
        &self.xattrs
    }
}

/// A regular file, or a hardlink group of regular files sharing one inode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegularFile {
    base: Base,
    size: u64,
    digests: Vec<Digest>,
    ads: Vec<AdsEntry>,
}

impl RegularFile {
    pub fn base(&self) -> &Base {
        &self.base
    }

    pub fn new(base: Base, size: u64, digests: Vec<Digest>) -> Result<RegularFile, Error> {
        if !base.mode.is_regular() {
            return Err(Error::InvalidManifest(format!(
                "{:?} is not a regular file mode",
                base.mode
            )));
        }
        Ok(RegularFile {
            base,
            size,
            digests: uniqify_digests(digests)?,
            ads: Vec::new(),
        })
    }

    pub(crate) fn with_ads(mut self, ads: Vec<AdsEntry>) -> RegularFile {
        self.ads = ads;
        self
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn digests(&self) -> &[Digest] {
        &self.digests
    }

    pub fn ads(&self) -> &[AdsEntry] {
        &self.ads
    }

    /// Coalesces an equivalence class of hardlinked files into one resource.
    ///
    /// All members must agree on mode, uid, gid, size and xattrs. The result
    /// carries the sorted union of paths and the uniqified union of digests;
    /// same-algorithm digests with different values abort the merge.
    pub fn merge(files: &[RegularFile]) -> Result<RegularFile, Error> {
        let prototype = files
            .first()
            .ok_or_else(|| Error::Conflict("no files to merge".into()))?;
        if files.len() == 1 {
            return Ok(prototype.clone());
        }

        for f in &files[1..] {
            if f.base.mode != prototype.base.mode {
                return Err(Error::Conflict(format!(
                    "modes do not match: {} != {}",
                    f.base.mode, prototype.base.mode
                )));
            }
            if f.base.uid != prototype.base.uid {
                return Err(Error::Conflict(format!(
                    "uid does not match: {} != {}",
                    f.base.uid, prototype.base.uid
                )));
            }
            if f.base.gid != prototype.base.gid {
                return Err(Error::Conflict(format!(
                    "gid does not match: {} != {}",
                    f.base.gid, prototype.base.gid
                )));
            }
            if f.size != prototype.size {
                return Err(Error::Conflict(format!(
                    "size does not match: {} != {}",
                    f.size, prototype.size
                )));
            }
            if f.base.xattrs != prototype.base.xattrs {
                return Err(Error::Conflict(format!(
                    "xattrs do not match for {:?}",
                    f.base.path()
                )));
            }
        }

        let mut paths: Vec<String> = files
            .iter()
            .flat_map(|f| f.base.paths.iter().cloned())
            .collect();
        paths.sort();
        paths.dedup();

        let digests = uniqify_digests(
            files
                .iter()
                .flat_map(|f| f.digests.iter().cloned())
                .collect(),
        )?;

        Ok(RegularFile {
            base: Base {
                paths,
                mode: prototype.base.mode,
                uid: prototype.base.uid.clone(),
                gid: prototype.base.gid.clone(),
                xattrs: prototype.base.xattrs.clone(),
            },
            size: prototype.size,
            digests,
            ads: prototype.ads.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    base: Base,
    opaque: bool,
}

impl Directory {
    pub fn base(&self) -> &Base {
        &self.base
    }

    pub fn new(base: Base) -> Result<Directory, Error> {
        if !base.mode.is_dir() {
            return Err(Error::InvalidManifest(format!(
                "{:?} is not a directory mode",
                base.mode
            )));
        }
        Ok(Directory {
            base,
            opaque: false,
        })
    }

    /// Marks the directory opaque for use in a layered diff. Opaqueness is a
    /// merge artifact and is never serialized.
    pub fn opaque(mut self) -> Directory {
        self.opaque = true;
        self
    }

    pub fn is_opaque(&self) -> bool {
        self.opaque
    }

    pub(crate) fn without_opaqueness(mut self) -> Directory {
        self.opaque = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symlink {
    base: Base,
    target: String,
}

impl Symlink {
    pub fn base(&self) -> &Base {
        &self.base
    }

    pub fn new(base: Base, target: impl Into<String>) -> Result<Symlink, Error> {
        let target = target.into();
        if !base.mode.is_symlink() {
            return Err(Error::InvalidManifest(format!(
                "{:?} is not a symlink mode",
                base.mode
            )));
        }
        if target.is_empty() {
            return Err(Error::InvalidManifest(format!(
                "symlink {:?} has an empty target",
                base.path()
            )));
        }
        Ok(Symlink { base, target })
    }

    /// The link target: either relative to the link's directory, or rooted
    /// at the manifest root when it starts with `/`.
    pub fn target(&self) -> &str {
        &self.target
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedPipe {
    base: Base,
}

impl NamedPipe {
    pub fn base(&self) -> &Base {
        &self.base
    }

    pub fn new(base: Base) -> Result<NamedPipe, Error> {
        if !base.mode.is_named_pipe() {
            return Err(Error::InvalidManifest(format!(
                "{:?} is not a named pipe mode",
                base.mode
            )));
        }
        Ok(NamedPipe { base })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    base: Base,
    major: u64,
    minor: u64,
}

impl Device {
    pub fn base(&self) -> &Base {
        &self.base
    }

    pub fn new(base: Base, major: u64, minor: u64) -> Result<Device, Error> {
        if !base.mode.is_device() {
            return Err(Error::InvalidManifest(format!(
                "{:?} is not a device mode",
                base.mode
            )));
        }
        Ok(Device { base, major, minor })
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }
}

/// Erases a path and its subtree when merged onto a base manifest. Only
/// valid inside a layered diff; never serialized, never applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Whiteout {
    base: Base,
}

impl Whiteout {
    pub fn base(&self) -> &Base {
        &self.base
    }

    pub fn new(path: impl Into<String>) -> Result<Whiteout, Error> {
        let path = path.into();
        validate_path(&path)?;
        Ok(Whiteout {
            base: Base {
                paths: vec![path],
                mode: FileMode::default(),
                uid: String::new(),
                gid: String::new(),
                xattrs: XAttrs::new(),
            },
        })
    }
}

/// An alternate data stream attached to a regular file (Windows only). At
/// least one of `data` and `digest` is set.
#[derive(Clone, PartialEq, Eq)]
pub struct AdsEntry {
    pub name: String,
    pub data: Vec<u8>,
    pub digest: Option<Digest>,
}

impl fmt::Debug for AdsEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdsEntry")
            .field("name", &self.name)
            .field("data", &self.data.as_bstr())
            .field("digest", &self.digest)
            .finish()
    }
}

/// A single entity of a directory tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    RegularFile(RegularFile),
    Directory(Directory),
    Symlink(Symlink),
    NamedPipe(NamedPipe),
    Device(Device),
    Whiteout(Whiteout),
}

impl Resource {
    pub fn base(&self) -> &Base {
        match self {
            Resource::RegularFile(r) => &r.base,
            Resource::Directory(r) => &r.base,
            Resource::Symlink(r) => &r.base,
            Resource::NamedPipe(r) => &r.base,
            Resource::Device(r) => &r.base,
            Resource::Whiteout(r) => &r.base,
        }
    }

    /// The canonical path of the resource.
    pub fn path(&self) -> &str {
        self.base().path()
    }

    pub fn paths(&self) -> &[String] {
        self.base().paths()
    }

    pub fn mode(&self) -> FileMode {
        self.base().mode()
    }

    pub fn uid(&self) -> &str {
        self.base().uid()
    }

    pub fn gid(&self) -> &str {
        self.base().gid()
    }

    pub fn xattrs(&self) -> &XAttrs {
        self.base().xattrs()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Resource::RegularFile(_) => "regular file",
            Resource::Directory(_) => "directory",
            Resource::Symlink(_) => "symlink",
            Resource::NamedPipe(_) => "named pipe",
            Resource::Device(_) => "device",
            Resource::Whiteout(_) => "whiteout",
        }
    }
}
