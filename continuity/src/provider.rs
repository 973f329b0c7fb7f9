//! The engine-side contract for read-only mount front-ends: look up a
//! resource by path and obtain a reader for its content.
//!
//! Manifests only carry digests, so file bodies come from a separate content
//! channel, typically a staged directory laid out like the manifest.

use std::io;
use std::path::PathBuf;

use crate::digest::Digest;
use crate::errors::Error;
use crate::manifest::Manifest;
use crate::resource::Resource;

/// Supplies file bodies for the regular files of a manifest.
pub trait ContentProvider {
    /// Opens a reader for the content at the in-context `path`. `digest`
    /// carries the expected content digest when the manifest has one.
    fn open(&self, path: &str, digest: Option<&Digest>) -> Result<Box<dyn io::Read>, Error>;
}

/// Serves content from a directory laid out by resource path.
pub struct DirContentProvider {
    root: PathBuf,
}

impl DirContentProvider {
    pub fn new(root: impl Into<PathBuf>) -> DirContentProvider {
        DirContentProvider { root: root.into() }
    }
}

impl ContentProvider for DirContentProvider {
    fn open(&self, path: &str, _digest: Option<&Digest>) -> Result<Box<dyn io::Read>, Error> {
        let relative = path.trim_start_matches('/');
        Ok(Box::new(std::fs::File::open(self.root.join(relative))?))
    }
}

/// Looks up `path` in the manifest and, for regular files, opens its content
/// through the provider. Non-file resources resolve without a reader.
pub fn lookup<'m>(
    manifest: &'m Manifest,
    provider: &dyn ContentProvider,
    path: &str,
) -> Result<Option<(&'m Resource, Option<Box<dyn io::Read>>)>, Error> {
    let Some(resource) = manifest.find(path) else {
        return Ok(None);
    };

    let reader = match resource {
        Resource::RegularFile(f) => Some(provider.open(path, f.digests().first())?),
        _ => None,
    };

    Ok(Some((resource, reader)))
}
