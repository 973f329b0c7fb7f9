//! End-to-end tests over real directory trees.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::{symlink, MetadataExt, PermissionsExt};
use std::path::Path;

use pretty_assertions::assert_eq;

use continuity::driver::{Driver, SystemDriver};
use continuity::{
    apply_manifest, build_manifest, verify_manifest, Context, Error, FileMode, Manifest, Resource,
    VerifyError,
};

const HELLO_WORLD_DIGEST: &str =
    "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
const X_DIGEST: &str = "sha256:2d711642b726b04401627ca9fbac32f5c8530fb1903cc4db02258717921a4881";

fn write_file(path: &Path, contents: &[u8], mode: u32) {
    fs::write(path, contents).expect("write file");
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).expect("chmod");
}

fn make_dir(path: &Path, mode: u32) {
    fs::create_dir(path).expect("mkdir");
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).expect("chmod");
}

fn current_ids(path: &Path) -> (String, String) {
    let md = fs::symlink_metadata(path).expect("stat");
    (md.uid().to_string(), md.gid().to_string())
}

#[test]
fn simple_file_capture() {
    let root = tempfile::tempdir().expect("tempdir");
    write_file(&root.path().join("a"), b"hello world", 0o644);

    let ctx = Context::new(root.path()).expect("context");
    let manifest = build_manifest(&ctx).expect("build");

    assert_eq!(1, manifest.resources.len());
    let Resource::RegularFile(file) = &manifest.resources[0] else {
        panic!("expected a regular file, got {:?}", manifest.resources[0]);
    };

    let (uid, gid) = current_ids(&root.path().join("a"));
    assert_eq!("/a", file.base().path());
    assert_eq!(FileMode::new(0o644), file.base().mode());
    assert_eq!(uid, file.base().uid());
    assert_eq!(gid, file.base().gid());
    assert_eq!(11, file.size());
    assert_eq!(1, file.digests().len());
    assert_eq!(HELLO_WORLD_DIGEST, file.digests()[0].as_str());
}

#[test]
fn hardlink_group_coalesces() {
    let root = tempfile::tempdir().expect("tempdir");
    write_file(&root.path().join("a"), b"x", 0o644);
    fs::hard_link(root.path().join("a"), root.path().join("b")).expect("hard link");

    let ctx = Context::new(root.path()).expect("context");
    let manifest = build_manifest(&ctx).expect("build");

    assert_eq!(1, manifest.resources.len());
    let Resource::RegularFile(file) = &manifest.resources[0] else {
        panic!("expected a regular file");
    };

    let paths: Vec<&str> = file.base().paths().iter().map(String::as_str).collect();
    assert_eq!(vec!["/a", "/b"], paths);
    assert_eq!(1, file.size());
    assert_eq!(X_DIGEST, file.digests()[0].as_str());
}

#[test]
fn relative_symlinks_are_contained() {
    let root = tempfile::tempdir().expect("tempdir");
    write_file(&root.path().join("a"), b"content", 0o644);
    make_dir(&root.path().join("c"), 0o755);
    symlink("../a", root.path().join("c/link")).expect("symlink");

    let ctx = Context::new(root.path()).expect("context");
    let manifest = build_manifest(&ctx).expect("build");

    let Some(Resource::Symlink(link)) = manifest.find("/c/link") else {
        panic!("expected /c/link in the manifest");
    };
    assert_eq!("../a", link.target());
}

#[test]
fn escaping_symlink_aborts_build() {
    let root = tempfile::tempdir().expect("tempdir");
    make_dir(&root.path().join("c"), 0o755);
    symlink("../../../etc/passwd", root.path().join("c/bad")).expect("symlink");

    let ctx = Context::new(root.path()).expect("context");
    match build_manifest(&ctx) {
        Err(Error::Containment { .. }) => {}
        other => panic!("expected a containment error, got {other:?}"),
    }
}

#[test]
fn absolute_symlink_rewrites_to_root_relative() {
    let root = tempfile::tempdir().expect("tempdir");
    symlink(root.path().join("y"), root.path().join("x")).expect("symlink");

    let ctx = Context::new(root.path()).expect("context");
    let manifest = build_manifest(&ctx).expect("build");

    let Some(Resource::Symlink(link)) = manifest.find("/x") else {
        panic!("expected /x in the manifest");
    };
    assert_eq!("/y", link.target());
}

#[test]
fn absolute_symlink_outside_root_aborts_build() {
    let root = tempfile::tempdir().expect("tempdir");
    symlink("/etc/passwd", root.path().join("bad")).expect("symlink");

    let ctx = Context::new(root.path()).expect("context");
    match build_manifest(&ctx) {
        Err(Error::Containment { .. }) => {}
        other => panic!("expected a containment error, got {other:?}"),
    }
}

/// Lays out a tree with a bit of everything apply can reproduce.
fn populate_source(root: &Path) {
    make_dir(&root.join("bin"), 0o755);
    write_file(&root.join("bin/sh"), b"#!/bin/true\n", 0o755);
    make_dir(&root.join("etc"), 0o755);
    write_file(&root.join("etc/motd"), b"hello world", 0o644);
    write_file(&root.join("etc/secret"), b"sst", 0o600);
    symlink("motd", root.join("etc/motd.link")).expect("symlink");
    symlink(root.join("etc/motd"), root.join("motd")).expect("symlink");
    SystemDriver
        .mkfifo(&root.join("fifo"), FileMode::new(0o600))
        .expect("mkfifo");
    fs::set_permissions(root.join("fifo"), fs::Permissions::from_mode(0o600)).expect("chmod");
}

#[test]
fn built_manifests_verify_and_round_trip_the_wire() {
    let root = tempfile::tempdir().expect("tempdir");
    populate_source(root.path());

    let ctx = Context::new(root.path()).expect("context");
    let manifest = build_manifest(&ctx).expect("build");

    // sorted strictly by path
    let paths: Vec<&str> = manifest.resources.iter().map(|r| r.path()).collect();
    assert_eq!(
        vec![
            "/bin",
            "/bin/sh",
            "/etc",
            "/etc/motd",
            "/etc/motd.link",
            "/etc/secret",
            "/fifo",
            "/motd"
        ],
        paths
    );

    verify_manifest(&ctx, &manifest).expect("freshly built manifests verify");

    let encoded = manifest.encode().expect("encode");
    let decoded = Manifest::decode(&encoded).expect("decode");
    assert_eq!(manifest, decoded);
    assert_eq!(encoded, decoded.encode().expect("re-encode"));

    let json = manifest.encode_json().expect("encode json");
    assert_eq!(manifest, Manifest::decode_json(&json).expect("decode json"));
}

/// Stages regular file bodies into `target` at their manifest paths,
/// standing in for the caller's content channel.
fn stage_contents(source: &Path, target: &Path, manifest: &Manifest) {
    for resource in &manifest.resources {
        if let Resource::RegularFile(file) = resource {
            let primary = file.base().path().trim_start_matches('/');
            if let Some(parent) = target.join(primary).parent() {
                fs::create_dir_all(parent).expect("mkdir -p");
            }
            fs::copy(source.join(primary), target.join(primary)).expect("stage content");
        }
    }
}

#[test]
fn applied_manifests_rebuild_byte_identically() {
    let source = tempfile::tempdir().expect("tempdir");
    populate_source(source.path());
    write_file(&source.path().join("etc/linked"), b"x", 0o644);
    fs::hard_link(
        source.path().join("etc/linked"),
        source.path().join("etc/linked2"),
    )
    .expect("hard link");

    let source_ctx = Context::new(source.path()).expect("context");
    let manifest = build_manifest(&source_ctx).expect("build");

    let target = tempfile::tempdir().expect("tempdir");
    stage_contents(source.path(), target.path(), &manifest);

    let target_ctx = Context::new(target.path()).expect("context");
    apply_manifest(&target_ctx, &manifest).expect("apply");

    // hardlink aliases share an inode again
    let a = fs::metadata(target.path().join("etc/linked")).expect("stat");
    let b = fs::metadata(target.path().join("etc/linked2")).expect("stat");
    assert_eq!(a.ino(), b.ino());

    // absolute symlink target lands under the new root
    let motd = fs::read_link(target.path().join("motd")).expect("readlink");
    assert_eq!(target.path().join("etc/motd"), motd);

    let rebuilt = build_manifest(&target_ctx).expect("rebuild");
    assert_eq!(
        manifest.encode().expect("encode"),
        rebuilt.encode().expect("encode"),
        "applied tree must rebuild to a byte-identical manifest"
    );
}

#[test]
fn apply_requires_staged_file_content() {
    let root = tempfile::tempdir().expect("tempdir");
    write_file(&root.path().join("a"), b"hello world", 0o644);

    let ctx = Context::new(root.path()).expect("context");
    let manifest = build_manifest(&ctx).expect("build");

    let empty = tempfile::tempdir().expect("tempdir");
    let empty_ctx = Context::new(empty.path()).expect("context");
    match apply_manifest(&empty_ctx, &manifest) {
        Err(Error::NotFound) => {}
        other => panic!("expected not found, got {other:?}"),
    }
}

#[test]
fn apply_fixes_modes_and_replaces_symlinks() {
    let source = tempfile::tempdir().expect("tempdir");
    write_file(&source.path().join("a"), b"hello world", 0o600);
    symlink("a", source.path().join("l")).expect("symlink");

    let ctx = Context::new(source.path()).expect("context");
    let manifest = build_manifest(&ctx).expect("build");

    let target = tempfile::tempdir().expect("tempdir");
    write_file(&target.path().join("a"), b"hello world", 0o777);
    symlink("elsewhere", target.path().join("l")).expect("symlink");

    let target_ctx = Context::new(target.path()).expect("context");
    apply_manifest(&target_ctx, &manifest).expect("apply");

    let mode = fs::metadata(target.path().join("a")).expect("stat").mode();
    assert_eq!(0o600, mode & 0o777);
    assert_eq!(
        Path::new("a"),
        fs::read_link(target.path().join("l")).expect("readlink")
    );
}

#[test]
fn verify_detects_content_changes() {
    let root = tempfile::tempdir().expect("tempdir");
    write_file(&root.path().join("a"), b"hello world", 0o644);

    let ctx = Context::new(root.path()).expect("context");
    let manifest = build_manifest(&ctx).expect("build");

    // same size, different bytes
    write_file(&root.path().join("a"), b"HELLO WORLD", 0o644);

    match verify_manifest(&ctx, &manifest) {
        Err(Error::Verify(VerifyError::Digest { path })) => assert_eq!("/a", path),
        other => panic!("expected a digest mismatch, got {other:?}"),
    }
}

#[test]
fn verify_detects_mode_changes() {
    let root = tempfile::tempdir().expect("tempdir");
    write_file(&root.path().join("a"), b"hello world", 0o644);

    let ctx = Context::new(root.path()).expect("context");
    let manifest = build_manifest(&ctx).expect("build");

    fs::set_permissions(root.path().join("a"), fs::Permissions::from_mode(0o640)).expect("chmod");

    match verify_manifest(&ctx, &manifest) {
        Err(Error::Verify(VerifyError::Mode { path, .. })) => assert_eq!("/a", path),
        other => panic!("expected a mode mismatch, got {other:?}"),
    }
}

#[test]
fn verify_detects_missing_resources() {
    let root = tempfile::tempdir().expect("tempdir");
    write_file(&root.path().join("a"), b"hello world", 0o644);

    let ctx = Context::new(root.path()).expect("context");
    let manifest = build_manifest(&ctx).expect("build");

    fs::remove_file(root.path().join("a")).expect("remove");

    match verify_manifest(&ctx, &manifest) {
        Err(Error::NotFound) => {}
        other => panic!("expected not found, got {other:?}"),
    }
}

#[test]
fn walk_propagates_callback_errors() {
    let root = tempfile::tempdir().expect("tempdir");
    write_file(&root.path().join("a"), b"1", 0o644);
    write_file(&root.path().join("b"), b"2", 0o644);

    let ctx = Context::new(root.path()).expect("context");

    let mut seen = Vec::new();
    let result = ctx.walk(&mut |p, _fi| {
        seen.push(p.to_owned());
        Err(Error::Conflict("stop".into()))
    });

    match result {
        Err(Error::Conflict(msg)) => assert_eq!("stop", msg),
        other => panic!("expected the callback error, got {other:?}"),
    }
    assert_eq!(vec!["/a".to_owned()], seen, "walk stops on the first error");
}

#[test]
fn vanished_files_are_skipped_not_fatal() {
    // A file that disappears between readdir and lstat is skipped; simulate
    // the race by removing a file from the walk callback before the walker
    // reaches it.
    let root = tempfile::tempdir().expect("tempdir");
    write_file(&root.path().join("a"), b"1", 0o644);
    write_file(&root.path().join("b"), b"2", 0o644);

    let ctx = Context::new(root.path()).expect("context");

    let b = root.path().join("b");
    let mut seen = Vec::new();
    ctx.walk(&mut |p, _fi| {
        if p == "/a" && b.exists() {
            fs::remove_file(&b).expect("remove");
        }
        seen.push(p.to_owned());
        Ok(())
    })
    .expect("walk");

    assert_eq!(vec!["/a".to_owned()], seen);
}
