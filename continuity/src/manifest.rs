//! Manifests: ordered sets of resources describing a directory tree, and
//! the build/verify/apply operations over a [Context].

use std::collections::BTreeMap;

use prost::Message;
use tracing::warn;

use crate::context::Context;
use crate::errors::Error;
use crate::hardlinks::HardlinkManager;
use crate::proto;
use crate::resource::Resource;

/// Media type for the protobuf manifest encoding. The format is unstable
/// during v0.
pub const MEDIA_TYPE_MANIFEST_V0_PROTOBUF: &str = "application/vnd.continuity.manifest.v0+pb";
/// Media type for the JSON manifest encoding. The format is unstable during
/// v0.
pub const MEDIA_TYPE_MANIFEST_V0_JSON: &str = "application/vnd.continuity.manifest.v0+json";

/// An ordered set of resources, sorted strictly by primary path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub resources: Vec<Resource>,
}

impl Manifest {
    /// Looks up the resource whose primary path is `path`.
    pub fn find(&self, path: &str) -> Option<&Resource> {
        self.resources
            .binary_search_by(|r| r.path().cmp(path))
            .ok()
            .map(|i| &self.resources[i])
    }

    /// Decodes the protobuf wire form.
    pub fn decode(buf: &[u8]) -> Result<Manifest, Error> {
        let pb = proto::Manifest::decode(buf)
            .map_err(|err| Error::InvalidManifest(err.to_string()))?;
        Manifest::try_from(&pb)
    }

    /// Encodes into the protobuf wire form.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(proto::Manifest::try_from(self)?.encode_to_vec())
    }

    /// Decodes the JSON text form.
    pub fn decode_json(buf: &[u8]) -> Result<Manifest, Error> {
        let pb: proto::Manifest =
            serde_json::from_slice(buf).map_err(|err| Error::InvalidManifest(err.to_string()))?;
        Manifest::try_from(&pb)
    }

    /// Encodes into the JSON text form, offered for diagnostics. The
    /// protobuf form is the interchange format.
    pub fn encode_json(&self) -> Result<Vec<u8>, Error> {
        let pb = proto::Manifest::try_from(self)?;
        serde_json::to_vec(&pb).map_err(|err| Error::InvalidManifest(err.to_string()))
    }
}

/// Captures a manifest of the context's tree.
///
/// Entries that vanish mid-walk or cannot be represented are skipped; any
/// other failure aborts the build.
pub fn build_manifest(ctx: &Context) -> Result<Manifest, Error> {
    let mut by_path: BTreeMap<String, Resource> = BTreeMap::new();
    let mut hardlinks = HardlinkManager::default();

    ctx.walk(&mut |p, fi| {
        let resource = match ctx.resource(p, Some(fi)) {
            Ok(resource) => resource,
            Err(Error::NotFound) => return Ok(()),
            Err(err) => {
                warn!(path = p, "error getting resource: {err}");
                return Err(err);
            }
        };

        // Hardlink candidates are grouped and merged after the walk; anything
        // the manager hands back goes straight into the manifest.
        if let Err(resource) = hardlinks.add(fi, resource) {
            by_path.insert(resource.path().to_owned(), resource);
        }

        Ok(())
    })?;

    for merged in hardlinks.merge()? {
        by_path.insert(
            merged.base().path().to_owned(),
            Resource::RegularFile(merged),
        );
    }

    Ok(Manifest {
        resources: by_path.into_values().collect(),
    })
}

/// Verifies every resource of the manifest against the context, aborting on
/// the first discrepancy.
pub fn verify_manifest(ctx: &Context, manifest: &Manifest) -> Result<(), Error> {
    for resource in &manifest.resources {
        ctx.verify(resource)?;
    }
    Ok(())
}

/// Applies every resource of the manifest onto the context, aborting on the
/// first failure.
pub fn apply_manifest(ctx: &Context, manifest: &Manifest) -> Result<(), Error> {
    for resource in &manifest.resources {
        ctx.apply(resource)?;
    }
    Ok(())
}
