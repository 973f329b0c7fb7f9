//! Pairwise comparison of manifests, used by overlay tooling.

use tracing::debug;

use crate::manifest::Manifest;
use crate::resource::Resource;

/// A resource present in both manifests whose fields differ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceUpdate {
    pub original: Resource,
    pub updated: Resource,
}

/// The three-way difference between two manifests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestDifference {
    pub additions: Vec<Resource>,
    pub deletions: Vec<Resource>,
    pub updates: Vec<ResourceUpdate>,
}

impl ManifestDifference {
    pub fn has_diff(&self) -> bool {
        !self.additions.is_empty() || !self.deletions.is_empty() || !self.updates.is_empty()
    }
}

/// Compares two sorted manifests, producing additions (paths only in `b`),
/// deletions (paths only in `a`) and updates (paths in both that differ).
pub fn diff_manifests(a: &Manifest, b: &Manifest) -> ManifestDifference {
    let mut difference = ManifestDifference::default();

    let r1 = &a.resources;
    let r2 = &b.resources;
    let mut i1 = 0;
    let mut i2 = 0;

    while i1 < r1.len() && i2 < r2.len() {
        let p1 = r1[i1].path();
        let p2 = r2[i2].path();

        if p1 < p2 {
            debug!(path = p1, "deletion");
            difference.deletions.push(r1[i1].clone());
            i1 += 1;
        } else if p1 == p2 {
            if !compare(&r1[i1], &r2[i2]) {
                debug!(path = p1, "update");
                difference.updates.push(ResourceUpdate {
                    original: r1[i1].clone(),
                    updated: r2[i2].clone(),
                });
            }
            i1 += 1;
            i2 += 1;
        } else {
            debug!(path = p2, "addition");
            difference.additions.push(r2[i2].clone());
            i2 += 1;
        }
    }

    difference.deletions.extend(r1[i1..].iter().cloned());
    difference.additions.extend(r2[i2..].iter().cloned());

    difference
}

/// Whether the two resources describe the same entity: equal header fields,
/// then the variant-specific comparison.
pub fn compare(r1: &Resource, r2: &Resource) -> bool {
    let (b1, b2) = (r1.base(), r2.base());
    if b1.path() != b2.path()
        || b1.mode() != b2.mode()
        || b1.uid() != b2.uid()
        || b1.gid() != b2.gid()
    {
        return false;
    }

    match (r1, r2) {
        (Resource::RegularFile(f1), Resource::RegularFile(f2)) => {
            f1.size() == f2.size()
                && f1.base().paths() == f2.base().paths()
                && f1.digests() == f2.digests()
        }
        (Resource::Symlink(l1), Resource::Symlink(l2)) => l1.target() == l2.target(),
        (Resource::Device(d1), Resource::Device(d2)) => {
            d1.major() == d2.major() && d1.minor() == d2.minor()
        }
        (Resource::Directory(_), Resource::Directory(_)) => true,
        (Resource::NamedPipe(_), Resource::NamedPipe(_)) => true,
        (Resource::Whiteout(_), Resource::Whiteout(_)) => true,
        _ => false,
    }
}
