//! A transport-agnostic description of filesystem metadata.
//!
//! Continuity captures a directory tree into a *manifest*: a canonical,
//! portable record of paths, modes, ownership, extended attributes, device
//! numbers, symlink targets and hardlink groupings, plus content digests for
//! regular files. Two trees whose structure and contents agree produce
//! byte-identical manifests, and any manifest can be verified against or
//! applied onto a staged tree.

mod cleanpath;
mod context;
mod diff;
mod digest;
mod errors;
mod hardlinks;
mod manifest;
mod merge;
mod mode;
mod names;
mod resource;

pub mod driver;
pub mod proto;
pub mod provider;

pub use context::{Context, ContextOptions, SymlinkPolicy};
pub use diff::{compare, diff_manifests, ManifestDifference, ResourceUpdate};
pub use digest::{
    digest_reader, digests_match, uniqify_digests, Digest, DigestError, CANONICAL_ALGORITHM,
};
pub use errors::{Error, VerifyError};
pub use manifest::{
    apply_manifest, build_manifest, verify_manifest, Manifest, MEDIA_TYPE_MANIFEST_V0_JSON,
    MEDIA_TYPE_MANIFEST_V0_PROTOBUF,
};
pub use merge::merge_manifests;
pub use mode::FileMode;
pub use resource::{
    AdsEntry, Base, Device, Directory, NamedPipe, RegularFile, Resource, Symlink, Whiteout, XAttrs,
};
