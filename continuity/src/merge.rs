//! Layered overlay of manifests with whiteout and opaque-directory
//! semantics.

use crate::manifest::Manifest;
use crate::resource::Resource;

fn as_dir(path: &str) -> String {
    if path.ends_with('/') {
        path.to_owned()
    } else {
        format!("{path}/")
    }
}

/// Merges a diff manifest onto a base manifest. Only the diff may contain
/// whiteouts and opaque directories:
///
/// - a whiteout erases the base entry at its path and everything under it;
/// - an opaque directory replaces the base's subtree entirely and is emitted
///   with the flag cleared;
/// - a non-directory replacing a base directory also drops the base subtree.
pub fn merge_manifests(manifest: &Manifest, diff: &Manifest) -> Manifest {
    let mut base = manifest.resources.clone();
    base.sort_by(|a, b| a.path().cmp(b.path()));
    let mut overlay = diff.resources.clone();
    overlay.sort_by(|a, b| a.path().cmp(b.path()));

    merge_resources(base, overlay)
}

fn merge_resources(r1: Vec<Resource>, r2: Vec<Resource>) -> Manifest {
    let mut result: Vec<Resource> = Vec::with_capacity(r1.len());

    let mut i1 = 0;
    let mut i2 = 0;

    while i1 < r1.len() && i2 < r2.len() {
        let p1 = r1[i1].path();
        let p2 = r2[i2].path();

        if p1 < p2 {
            result.push(r1[i1].clone());
            i1 += 1;
            continue;
        }

        if p1 == p2 {
            // the diff entry replaces the base entry
            i1 += 1;
        }

        let mut skip_path = None;
        match &r2[i2] {
            Resource::Whiteout(w) => skip_path = Some(as_dir(w.base().path())),
            Resource::Directory(d) => {
                if d.is_opaque() {
                    skip_path = Some(as_dir(d.base().path()));
                    result.push(Resource::Directory(d.clone().without_opaqueness()));
                } else {
                    result.push(r2[i2].clone());
                }
            }
            other => {
                // not a directory: anything under the path is replaced too
                skip_path = Some(as_dir(other.path()));
                result.push(other.clone());
            }
        }

        if let Some(skip) = skip_path {
            while i1 < r1.len() && r1[i1].path().starts_with(&skip) {
                i1 += 1;
            }
        }
        i2 += 1;
    }

    while i1 < r1.len() {
        result.push(r1[i1].clone());
        i1 += 1;
    }

    while i2 < r2.len() {
        match &r2[i2] {
            // no base entries are left to erase
            Resource::Whiteout(_) => {}
            Resource::Directory(d) if d.is_opaque() => {
                result.push(Resource::Directory(d.clone().without_opaqueness()));
            }
            other => result.push(other.clone()),
        }
        i2 += 1;
    }

    Manifest { resources: result }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::FileMode;
    use crate::resource::{Base, Directory, RegularFile, Whiteout};
    use pretty_assertions::assert_eq;

    fn file(path: &str) -> Resource {
        Resource::RegularFile(
            RegularFile::new(
                Base::new(path, FileMode::new(0o644), "0", "0").unwrap(),
                0,
                vec![],
            )
            .unwrap(),
        )
    }

    fn dir(path: &str) -> Resource {
        Resource::Directory(
            Directory::new(Base::new(path, FileMode::DIR | FileMode::new(0o755), "0", "0").unwrap())
                .unwrap(),
        )
    }

    fn opaque_dir(path: &str) -> Resource {
        match dir(path) {
            Resource::Directory(d) => Resource::Directory(d.opaque()),
            _ => unreachable!(),
        }
    }

    fn whiteout(path: &str) -> Resource {
        Resource::Whiteout(Whiteout::new(path).unwrap())
    }

    fn manifest(resources: Vec<Resource>) -> Manifest {
        Manifest { resources }
    }

    fn paths(m: &Manifest) -> Vec<&str> {
        m.resources.iter().map(|r| r.path()).collect()
    }

    #[test]
    fn whiteout_erases_subtree() {
        let base = manifest(vec![file("/a"), dir("/b"), file("/b/f"), file("/c")]);
        let diff = manifest(vec![whiteout("/b"), file("/d")]);

        let merged = merge_manifests(&base, &diff);
        assert_eq!(vec!["/a", "/c", "/d"], paths(&merged));
    }

    #[test]
    fn opaque_directory_replaces_subtree() {
        let base = manifest(vec![dir("/d"), file("/d/x"), file("/d/y")]);
        let diff = manifest(vec![opaque_dir("/d")]);

        let merged = merge_manifests(&base, &diff);
        assert_eq!(vec!["/d"], paths(&merged));

        match &merged.resources[0] {
            Resource::Directory(d) => assert!(!d.is_opaque()),
            other => panic!("expected a directory, got {other:?}"),
        }
    }

    #[test]
    fn plain_directory_in_diff_keeps_base_children() {
        let base = manifest(vec![dir("/d"), file("/d/x")]);
        let diff = manifest(vec![dir("/d")]);

        let merged = merge_manifests(&base, &diff);
        assert_eq!(vec!["/d", "/d/x"], paths(&merged));
    }

    #[test]
    fn file_replacing_directory_drops_subtree() {
        let base = manifest(vec![dir("/d"), file("/d/x"), file("/e")]);
        let diff = manifest(vec![file("/d")]);

        let merged = merge_manifests(&base, &diff);
        assert_eq!(vec!["/d", "/e"], paths(&merged));
        assert!(matches!(merged.resources[0], Resource::RegularFile(_)));
    }

    #[test]
    fn equal_paths_prefer_the_diff() {
        let base = manifest(vec![file("/a")]);
        let mut updated = file("/a");
        if let Resource::RegularFile(f) = &base.resources[0] {
            updated = Resource::RegularFile(
                RegularFile::new(
                    Base::new("/a", FileMode::new(0o600), f.base().uid(), f.base().gid()).unwrap(),
                    0,
                    vec![],
                )
                .unwrap(),
            );
        }
        let diff = manifest(vec![updated.clone()]);

        let merged = merge_manifests(&base, &diff);
        assert_eq!(vec![updated], merged.resources);
    }

    #[test]
    fn merge_with_empty_diff_is_identity() {
        let base = manifest(vec![file("/a"), dir("/b"), file("/b/f")]);
        assert_eq!(base, merge_manifests(&base, &Manifest::default()));
    }

    #[test]
    fn merge_onto_empty_base_strips_whiteouts() {
        let diff = manifest(vec![file("/a"), whiteout("/b"), opaque_dir("/d")]);

        let merged = merge_manifests(&Manifest::default(), &diff);
        assert_eq!(vec!["/a", "/d"], paths(&merged));
        match &merged.resources[1] {
            Resource::Directory(d) => assert!(!d.is_opaque()),
            other => panic!("expected a directory, got {other:?}"),
        }
    }

    #[test]
    fn trailing_diff_entries_still_erase_nothing_but_append() {
        let base = manifest(vec![file("/a")]);
        let diff = manifest(vec![file("/b"), whiteout("/c"), file("/d")]);

        let merged = merge_manifests(&base, &diff);
        assert_eq!(vec!["/a", "/b", "/d"], paths(&merged));
    }
}
