//! Coalescing of hardlinked files during a build.
//!
//! Walking a tree surfaces every member of a hardlink group as its own
//! entry. The manager collects candidates keyed by their platform identity
//! and merges each group into a single multi-path resource once the walk
//! completes.

use std::collections::HashMap;

use crate::driver::FileInfo;
use crate::errors::Error;
use crate::resource::{RegularFile, Resource};

/// Identifies one inode. Platform-specific: where no stable identity
/// exists, no key can be built and hardlinks are not coalesced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct HardlinkKey {
    dev: u64,
    ino: u64,
}

impl HardlinkKey {
    /// Builds the key for a link candidate. Files with a single link are
    /// not candidates.
    fn new(fi: &FileInfo) -> Option<HardlinkKey> {
        if fi.nlink < 2 {
            return None;
        }

        #[cfg(unix)]
        {
            Some(HardlinkKey {
                dev: fi.dev,
                ino: fi.ino,
            })
        }
        #[cfg(not(unix))]
        {
            None
        }
    }
}

#[derive(Default)]
pub(crate) struct HardlinkManager {
    hardlinks: HashMap<HardlinkKey, Vec<RegularFile>>,
}

impl HardlinkManager {
    /// Offers `resource` to the manager. Non-candidates (wrong kind, single
    /// link, or no platform key) are handed back to the caller unchanged.
    pub(crate) fn add(&mut self, fi: &FileInfo, resource: Resource) -> Result<(), Resource> {
        if !fi.mode.is_regular() {
            return Err(resource);
        }
        let file = match resource {
            Resource::RegularFile(f) => f,
            other => return Err(other),
        };
        match HardlinkKey::new(fi) {
            Some(key) => {
                self.hardlinks.entry(key).or_default().push(file);
                Ok(())
            }
            None => Err(Resource::RegularFile(file)),
        }
    }

    /// Merges each group into one resource.
    pub(crate) fn merge(self) -> Result<Vec<RegularFile>, Error> {
        let mut resources = Vec::with_capacity(self.hardlinks.len());
        for (key, linked) in self.hardlinks {
            let merged = RegularFile::merge(&linked).map_err(|err| {
                Error::Conflict(format!("merging hardlinks for {key:?}: {err}"))
            })?;
            resources.push(merged);
        }
        Ok(resources)
    }
}
