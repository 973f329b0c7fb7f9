//! The manifest wire schema: length-delimited protobuf framing with fixed
//! field tags, plus a schema-equivalent JSON text form for diagnostics.
//!
//! Encoding is deterministic: paths, digests and xattrs are written in their
//! model order, which the model keeps sorted. Decoding validates the
//! ordering, so `encode(decode(encode(m)))` is byte-identical to
//! `encode(m)`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::cleanpath;
use crate::digest::{uniqify_digests, Digest};
use crate::errors::Error;
use crate::mode::FileMode;
use crate::resource;
use crate::resource::{Base, XAttrs};

/// The top-level wire message: repeated resources, sorted by path.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    #[prost(message, repeated, tag = "1")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resource: Vec<Resource>,
}

/// One entry of a manifest.
///
/// Field numbers are frozen; `user` and `group` are the deprecated name
/// forms, preferred by readers when non-empty.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Resource {
    /// Sorted; the first entry is the canonical path. More than one entry
    /// encodes a hardlink group.
    #[prost(string, repeated, tag = "1")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,

    #[prost(int64, tag = "2")]
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub uid: i64,

    #[prost(int64, tag = "3")]
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub gid: i64,

    #[prost(string, tag = "4")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user: String,

    #[prost(string, tag = "5")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub group: String,

    /// The portable mode layout, not a host `st_mode`.
    #[prost(uint32, tag = "6")]
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub mode: u32,

    /// Regular files only; zero otherwise.
    #[prost(uint64, tag = "7")]
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub size: u64,

    /// `<algorithm>:<hex>` strings, sorted and uniqified.
    #[prost(string, repeated, tag = "8")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub digest: Vec<String>,

    /// Symlinks only.
    #[prost(string, tag = "9")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub target: String,

    /// Devices only.
    #[prost(uint64, tag = "10")]
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub major: u64,

    /// Devices only.
    #[prost(uint64, tag = "11")]
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub minor: u64,

    /// Sorted by name.
    #[prost(message, repeated, tag = "12")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub xattr: Vec<XAttr>,

    /// Windows alternate data streams.
    #[prost(message, repeated, tag = "13")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ads: Vec<AdsEntry>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct XAttr {
    #[prost(string, tag = "1")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[prost(bytes = "vec", tag = "2")]
    #[serde(with = "serde_bytes_base64", skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<u8>,
}

/// At least one of `data` and `digest` is set.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct AdsEntry {
    #[prost(string, tag = "1")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[prost(bytes = "vec", tag = "2")]
    #[serde(with = "serde_bytes_base64", skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<u8>,

    #[prost(string, tag = "3")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub digest: String,
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

/// Bytes fields travel base64-encoded in the JSON form.
mod serde_bytes_base64 {
    use data_encoding::BASE64;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        BASE64
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

impl TryFrom<&crate::Manifest> for Manifest {
    type Error = Error;

    fn try_from(manifest: &crate::Manifest) -> Result<Manifest, Error> {
        let mut pb = Manifest::default();
        for resource in &manifest.resources {
            pb.resource.push(to_proto(resource)?);
        }
        Ok(pb)
    }
}

impl TryFrom<&Manifest> for crate::Manifest {
    type Error = Error;

    fn try_from(pb: &Manifest) -> Result<crate::Manifest, Error> {
        let mut resources = Vec::with_capacity(pb.resource.len());
        let mut all_paths: HashSet<&str> = HashSet::new();

        for entry in &pb.resource {
            for p in &entry.path {
                if !all_paths.insert(p) {
                    return Err(Error::InvalidManifest(format!("duplicate path {p:?}")));
                }
            }
            resources.push(from_proto(entry)?);
        }

        if !resources.windows(2).all(|w| w[0].path() < w[1].path()) {
            return Err(Error::InvalidManifest(
                "resources are not sorted by path".into(),
            ));
        }

        Ok(crate::Manifest { resources })
    }
}

fn to_proto(resource: &resource::Resource) -> Result<Resource, Error> {
    use resource::Resource::*;

    let base = resource.base();
    let mut pb = Resource {
        path: base.paths().to_vec(),
        mode: base.mode().bits(),
        ..Default::default()
    };

    // Numeric ids go in the integer fields; anything else is a name and uses
    // the deprecated string fields.
    match base.uid().parse::<i64>() {
        Ok(uid) => pb.uid = uid,
        Err(_) => pb.user = base.uid().to_owned(),
    }
    match base.gid().parse::<i64>() {
        Ok(gid) => pb.gid = gid,
        Err(_) => pb.group = base.gid().to_owned(),
    }

    for (name, data) in base.xattrs() {
        pb.xattr.push(XAttr {
            name: name.clone(),
            data: data.clone(),
        });
    }

    match resource {
        RegularFile(f) => {
            pb.size = f.size();
            pb.digest = f.digests().iter().map(|d| d.to_string()).collect();
            pb.ads = f
                .ads()
                .iter()
                .map(|entry| AdsEntry {
                    name: entry.name.clone(),
                    data: entry.data.clone(),
                    digest: entry
                        .digest
                        .as_ref()
                        .map(|d| d.to_string())
                        .unwrap_or_default(),
                })
                .collect();
        }
        Symlink(l) => pb.target = l.target().to_owned(),
        Device(d) => {
            pb.major = d.major();
            pb.minor = d.minor();
        }
        Directory(_) | NamedPipe(_) => {}
        Whiteout(_) => {
            return Err(Error::InvalidManifest(format!(
                "whiteout {:?} cannot be serialized",
                resource.path()
            )))
        }
    }

    Ok(pb)
}

fn from_proto(pb: &Resource) -> Result<resource::Resource, Error> {
    if pb.path.is_empty() {
        return Err(Error::InvalidManifest("resource has no paths".into()));
    }
    for p in &pb.path {
        if !cleanpath::is_clean_manifest_path(p) {
            return Err(Error::InvalidManifest(format!(
                "path {p:?} is not clean and absolute"
            )));
        }
    }
    if !pb.path.windows(2).all(|w| w[0] < w[1]) {
        return Err(Error::InvalidManifest(format!(
            "paths {:?} are not sorted and unique",
            pb.path
        )));
    }

    let mode = FileMode::new(pb.mode);
    if pb.path.len() > 1 && !mode.is_regular() {
        return Err(Error::InvalidManifest(format!(
            "only regular files may carry multiple paths, got {:?}",
            pb.path
        )));
    }

    // readers prefer the deprecated name forms when present
    let uid = if pb.user.is_empty() {
        pb.uid.to_string()
    } else {
        pb.user.clone()
    };
    let gid = if pb.group.is_empty() {
        pb.gid.to_string()
    } else {
        pb.group.clone()
    };

    let mut xattrs = XAttrs::new();
    let mut last_name: Option<&str> = None;
    for xattr in &pb.xattr {
        if last_name.is_some_and(|prev| prev >= xattr.name.as_str()) {
            return Err(Error::InvalidManifest(format!(
                "xattrs are not sorted by name at {:?}",
                xattr.name
            )));
        }
        last_name = Some(&xattr.name);
        xattrs.insert(xattr.name.clone(), xattr.data.clone());
    }

    let base = Base::with_paths(pb.path.clone(), mode, uid, gid)?.with_xattrs(xattrs);

    if mode.is_regular() {
        let digests = pb
            .digest
            .iter()
            .map(|d| Digest::parse(d))
            .collect::<Result<Vec<_>, _>>()?;
        if uniqify_digests(digests.clone())
            .map_err(|err| Error::InvalidManifest(err.to_string()))?
            != digests
        {
            return Err(Error::InvalidManifest(format!(
                "digests {:?} are not sorted and unique",
                pb.digest
            )));
        }

        let mut ads = Vec::with_capacity(pb.ads.len());
        for entry in &pb.ads {
            let digest = if entry.digest.is_empty() {
                None
            } else {
                Some(Digest::parse(&entry.digest)?)
            };
            if entry.data.is_empty() && digest.is_none() {
                return Err(Error::InvalidManifest(format!(
                    "alternate data stream {:?} carries neither data nor digest",
                    entry.name
                )));
            }
            ads.push(resource::AdsEntry {
                name: entry.name.clone(),
                data: entry.data.clone(),
                digest,
            });
        }

        return Ok(resource::Resource::RegularFile(
            resource::RegularFile::new(base, pb.size, digests)?.with_ads(ads),
        ));
    }

    if mode.is_dir() {
        return Ok(resource::Resource::Directory(resource::Directory::new(
            base,
        )?));
    }

    if mode.is_symlink() {
        return Ok(resource::Resource::Symlink(resource::Symlink::new(
            base,
            pb.target.clone(),
        )?));
    }

    if mode.is_named_pipe() {
        return Ok(resource::Resource::NamedPipe(resource::NamedPipe::new(
            base,
        )?));
    }

    if mode.is_device() {
        return Ok(resource::Resource::Device(resource::Device::new(
            base, pb.major, pb.minor,
        )?));
    }

    Err(Error::InvalidManifest(format!(
        "mode {mode:?} of {:?} does not describe a representable resource",
        pb.path[0]
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::digest_reader;
    use crate::resource::{
        Base, Device, Directory, NamedPipe, RegularFile, Resource, Symlink, Whiteout,
    };
    use pretty_assertions::assert_eq;

    fn sample_manifest() -> crate::Manifest {
        let digest = digest_reader(&mut &b"hello world"[..]).unwrap();

        let mut xattrs = XAttrs::new();
        xattrs.insert("security.selinux".into(), b"system_u:object_r:etc_t".to_vec());
        xattrs.insert("user.note".into(), vec![0xff, 0x00, 0x01]);

        crate::Manifest {
            resources: vec![
                Resource::RegularFile(
                    RegularFile::new(
                        Base::with_paths(
                            vec!["/a".into(), "/b".into()],
                            FileMode::new(0o644),
                            "0",
                            "0",
                        )
                        .unwrap(),
                        11,
                        vec![digest],
                    )
                    .unwrap(),
                ),
                Resource::Directory(
                    Directory::new(
                        Base::new("/etc", FileMode::DIR | FileMode::new(0o755), "0", "0")
                            .unwrap()
                            .with_xattrs(xattrs),
                    )
                    .unwrap(),
                ),
                Resource::NamedPipe(
                    NamedPipe::new(
                        Base::new("/fifo", FileMode::NAMED_PIPE | FileMode::new(0o666), "0", "0")
                            .unwrap(),
                    )
                    .unwrap(),
                ),
                Resource::Symlink(
                    Symlink::new(
                        Base::new("/link", FileMode::SYMLINK | FileMode::new(0o777), "0", "0")
                            .unwrap(),
                        "../a",
                    )
                    .unwrap(),
                ),
                Resource::Device(
                    Device::new(
                        Base::new(
                            "/null",
                            FileMode::DEVICE | FileMode::CHAR_DEVICE | FileMode::new(0o666),
                            "root",
                            "root",
                        )
                        .unwrap(),
                        1,
                        3,
                    )
                    .unwrap(),
                ),
            ],
        }
    }

    #[test]
    fn round_trip_protobuf() {
        let manifest = sample_manifest();
        let encoded = manifest.encode().unwrap();
        let decoded = crate::Manifest::decode(&encoded).unwrap();
        assert_eq!(manifest, decoded);

        // byte-for-byte stability of re-encoding
        assert_eq!(encoded, decoded.encode().unwrap());
    }

    #[test]
    fn round_trip_json() {
        let manifest = sample_manifest();
        let encoded = manifest.encode_json().unwrap();
        let decoded = crate::Manifest::decode_json(&encoded).unwrap();
        assert_eq!(manifest, decoded);
    }

    #[test]
    fn json_omits_defaults_and_uses_wire_names() {
        let manifest = sample_manifest();
        let json: serde_json::Value =
            serde_json::from_slice(&manifest.encode_json().unwrap()).unwrap();

        let file = &json["resource"][0];
        assert_eq!(file["size"], 11);
        assert!(file.get("uid").is_none(), "zero uid must be omitted");
        assert!(file.get("target").is_none(), "empty target must be omitted");

        let device = &json["resource"][4];
        assert_eq!(device["user"], "root");
        assert!(device.get("size").is_none());
    }

    #[test]
    fn name_form_ids_survive_the_wire() {
        let manifest = sample_manifest();
        let decoded = crate::Manifest::decode(&manifest.encode().unwrap()).unwrap();

        let device = decoded.find("/null").unwrap();
        assert_eq!("root", device.uid());
        assert_eq!("root", device.gid());
    }

    #[test]
    fn whiteouts_do_not_serialize() {
        let manifest = crate::Manifest {
            resources: vec![Resource::Whiteout(Whiteout::new("/gone").unwrap())],
        };
        match manifest.encode() {
            Err(Error::InvalidManifest(_)) => {}
            other => panic!("expected invalid manifest, got {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_unsorted_resources() {
        let pb = Manifest {
            resource: vec![
                super::Resource {
                    path: vec!["/b".into()],
                    mode: FileMode::new(0o644).bits(),
                    ..Default::default()
                },
                super::Resource {
                    path: vec!["/a".into()],
                    mode: FileMode::new(0o644).bits(),
                    ..Default::default()
                },
            ],
        };
        crate::Manifest::try_from(&pb).expect_err("unsorted manifests must be rejected");
    }

    #[test]
    fn decode_rejects_duplicate_paths() {
        let entry = super::Resource {
            path: vec!["/a".into()],
            mode: FileMode::new(0o644).bits(),
            ..Default::default()
        };
        let pb = Manifest {
            resource: vec![entry.clone(), entry],
        };
        crate::Manifest::try_from(&pb).expect_err("duplicate paths must be rejected");
    }

    #[test]
    fn decode_rejects_hardlinked_directories() {
        let pb = Manifest {
            resource: vec![super::Resource {
                path: vec!["/a".into(), "/b".into()],
                mode: (FileMode::DIR | FileMode::new(0o755)).bits(),
                ..Default::default()
            }],
        };
        crate::Manifest::try_from(&pb).expect_err("multi-path directories must be rejected");
    }

    #[test]
    fn decode_rejects_unsorted_digests() {
        let pb = Manifest {
            resource: vec![super::Resource {
                path: vec!["/a".into()],
                mode: FileMode::new(0o644).bits(),
                digest: vec![
                    format!("sha512:{}", "0".repeat(128)),
                    format!("sha256:{}", "0".repeat(64)),
                ],
                ..Default::default()
            }],
        };
        crate::Manifest::try_from(&pb).expect_err("unsorted digests must be rejected");
    }

    #[test]
    fn decode_rejects_socket_modes() {
        let pb = Manifest {
            resource: vec![super::Resource {
                path: vec!["/sock".into()],
                mode: (FileMode::SOCKET | FileMode::new(0o755)).bits(),
                ..Default::default()
            }],
        };
        crate::Manifest::try_from(&pb).expect_err("sockets are not representable");
    }

    #[test]
    fn decode_rejects_unsorted_xattrs() {
        let pb = Manifest {
            resource: vec![super::Resource {
                path: vec!["/a".into()],
                mode: FileMode::new(0o644).bits(),
                xattr: vec![
                    XAttr {
                        name: "user.b".into(),
                        data: vec![1],
                    },
                    XAttr {
                        name: "user.a".into(),
                        data: vec![2],
                    },
                ],
                ..Default::default()
            }],
        };
        crate::Manifest::try_from(&pb).expect_err("unsorted xattrs must be rejected");
    }
}
