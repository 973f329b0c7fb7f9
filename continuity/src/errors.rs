use std::io;

use crate::digest::DigestError;
use crate::mode::FileMode;

/// Errors surfaced by the manifest engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An expected resource is missing. During a build this is treated as
    /// "skip the entry"; everywhere else it aborts the operation.
    #[error("not found")]
    NotFound,

    /// The capability is unavailable on this platform or filesystem.
    #[error("{0} not supported")]
    NotSupported(&'static str),

    /// A path or symlink target refers outside the context root.
    #[error("path {path:?} escapes the context root")]
    Containment { path: String },

    /// Metadata disagreement while coalescing a hardlink group, or digests
    /// of the same algorithm with different values.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A per-field discrepancy found while verifying a resource on disk.
    #[error(transparent)]
    Verify(#[from] VerifyError),

    /// The serialized form violates the manifest schema.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error(transparent)]
    Io(io::Error),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            Error::NotFound
        } else {
            Error::Io(err)
        }
    }
}

impl From<DigestError> for Error {
    fn from(err: DigestError) -> Self {
        Error::InvalidManifest(err.to_string())
    }
}

/// Field-level mismatches reported by verification.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("resource paths do not match: {actual:?} != {expected:?}")]
    Path { expected: String, actual: String },

    #[error("resource {path:?} has incorrect mode: {actual} != {expected}")]
    Mode {
        path: String,
        expected: FileMode,
        actual: FileMode,
    },

    #[error("unexpected uid for {path:?}: {actual:?} != {expected:?}")]
    Uid {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("unexpected gid for {path:?}: {actual:?} != {expected:?}")]
    Gid {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("resource {path:?} has incorrect size: {actual} != {expected}")]
    Size {
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("digests for resource {path:?} do not match")]
    Digest { path: String },

    #[error("resource {path:?} has mismatched symlink target: {actual:?} != {expected:?}")]
    Target {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("resource {path:?} is missing xattr {name:?}")]
    XAttrMissing { path: String, name: String },

    #[error("xattr {name:?} value differs for resource {path:?}")]
    XAttrValue { path: String, name: String },

    #[error("resource {path:?} is not a {expected}")]
    Kind { path: String, expected: &'static str },
}
