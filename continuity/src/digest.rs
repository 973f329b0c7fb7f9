//! Content digests in the OCI `<algorithm>:<hex>` string form.

use std::collections::{HashMap, HashSet};
use std::io;

use data_encoding::HEXLOWER;
use sha2::{Digest as _, Sha256};

use crate::errors::Error;

/// The algorithm used when capturing file contents.
pub const CANONICAL_ALGORITHM: &str = "sha256";

/// A content digest, e.g. `sha256:b94d27b9…`.
///
/// Ordering is lexical over the full string form, which groups digests by
/// algorithm and keeps serialized digest lists stable.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(String);

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum DigestError {
    #[error("digest {0:?} is not in <algorithm>:<hex> form")]
    Malformed(String),

    #[error("unknown digest algorithm {0:?}")]
    UnknownAlgorithm(String),

    #[error("digest {0:?} has an invalid length for its algorithm")]
    InvalidLength(String),
}

/// Hex length of the encoded portion for each supported algorithm.
fn encoded_len(algorithm: &str) -> Option<usize> {
    match algorithm {
        "sha256" => Some(64),
        "sha384" => Some(96),
        "sha512" => Some(128),
        _ => None,
    }
}

impl Digest {
    /// Parses and validates the string form.
    pub fn parse(s: &str) -> Result<Digest, DigestError> {
        let (algorithm, encoded) = s
            .split_once(':')
            .ok_or_else(|| DigestError::Malformed(s.to_owned()))?;

        let expected = encoded_len(algorithm)
            .ok_or_else(|| DigestError::UnknownAlgorithm(algorithm.to_owned()))?;
        if encoded.len() != expected {
            return Err(DigestError::InvalidLength(s.to_owned()));
        }
        if !encoded.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return Err(DigestError::Malformed(s.to_owned()));
        }

        Ok(Digest(s.to_owned()))
    }

    pub fn algorithm(&self) -> &str {
        // validated to contain a separator on construction
        self.0.split_once(':').expect("digest has an algorithm").0
    }

    pub fn encoded(&self) -> &str {
        self.0.split_once(':').expect("digest has an algorithm").1
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Digest, DigestError> {
        Digest::parse(s)
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// Digests everything readable from `r` with the canonical algorithm.
pub fn digest_reader<R: io::Read>(r: &mut R) -> io::Result<Digest> {
    let mut hasher = Sha256::new();
    io::copy(r, &mut hasher)?;
    Ok(Digest(format!(
        "{}:{}",
        CANONICAL_ALGORITHM,
        HEXLOWER.encode(&hasher.finalize())
    )))
}

/// Sorts and uniqifies `digests`, failing if two digests of the same
/// algorithm carry different values.
///
/// The sort is stable, so merging digest collections from multiple resources
/// "zips" them into one canonical ordering. Serialization relies on this for
/// byte-stable output.
pub fn uniqify_digests(mut digests: Vec<Digest>) -> Result<Vec<Digest>, Error> {
    digests.sort();
    let mut seen = HashSet::new();
    let mut algorithms: HashMap<&str, &Digest> = HashMap::new();

    let mut out = Vec::with_capacity(digests.len());
    for digest in &digests {
        if !seen.insert(digest.clone()) {
            continue;
        }

        if algorithms.insert(digest.algorithm(), digest).is_some() {
            return Err(Error::Conflict(format!(
                "conflicting digests for {} found",
                digest.algorithm()
            )));
        }

        out.push(digest.clone());
    }

    Ok(out)
}

/// Whether the two digest sets agree on at least one digest without any
/// same-algorithm conflict.
pub fn digests_match(a: &[Digest], b: &[Digest]) -> bool {
    let mut combined = Vec::with_capacity(a.len() + b.len());
    combined.extend_from_slice(a);
    combined.extend_from_slice(b);

    let disjoint = combined.len();
    match uniqify_digests(combined) {
        Ok(uniqified) => uniqified.len() < disjoint,
        Err(_) => false,
    }
}
