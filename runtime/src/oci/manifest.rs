//! Manifest and manifest-list decoding.
//!
//! Understands Docker schema2, Docker manifest lists, OCI manifests, OCI
//! indexes and the legacy schema1 format. Layers are reported in manifest
//! order with empty placeholder layers removed.

use imgrelay_core::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const DOCKER_MANIFEST_V1: &str = "application/vnd.docker.distribution.manifest.v1+json";
pub const DOCKER_MANIFEST_V1_SIGNED: &str =
    "application/vnd.docker.distribution.manifest.v1+prettyjws";
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Layers hosted outside the registry (Windows base layers).
pub const FOREIGN_LAYER_MEDIA_TYPES: &[&str] = &[
    "application/vnd.docker.image.rootfs.foreign.diff.tar",
    "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip",
    "application/vnd.oci.image.layer.nondistributable.v1.tar",
    "application/vnd.oci.image.layer.nondistributable.v1.tar+gzip",
    "application/vnd.oci.image.layer.nondistributable.v1.tar+zstd",
];

/// Digest of the gzipped empty tar used for metadata-only layers.
pub const EMPTY_LAYER_DIGEST: &str =
    "sha256:a3ed95caeb02ffe68cdd9fd84406680ae93d633cb16422d00e8a7c22955b46d4";

/// Media types sent in `Accept` when fetching manifests.
pub const MANIFEST_MEDIA_TYPES: &[&str] = &[
    OCI_INDEX,
    DOCKER_MANIFEST_LIST,
    OCI_MANIFEST,
    DOCKER_MANIFEST_V2,
    DOCKER_MANIFEST_V1_SIGNED,
    DOCKER_MANIFEST_V1,
];

/// `Accept` header value covering every supported manifest type.
pub fn accept_header() -> String {
    MANIFEST_MEDIA_TYPES.join(", ")
}

/// One filesystem layer of an image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Layer {
    pub digest: String,
    /// Compressed size in bytes (0 when the manifest does not record it)
    pub size: u64,
}

/// Content descriptor shared by schema2 and OCI documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,
    pub digest: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl Descriptor {
    /// A layer whose bytes live outside the registry.
    pub fn is_foreign(&self) -> bool {
        !self.urls.is_empty() || FOREIGN_LAYER_MEDIA_TYPES.contains(&self.media_type.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.variant {
            Some(v) => write!(f, "{}/{}/{}", self.os, self.architecture, v),
            None => write!(f, "{}/{}", self.os, self.architecture),
        }
    }
}

/// A single-platform image manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageManifest {
    /// Docker schema2 or OCI manifest
    V2 {
        media_type: String,
        config: Descriptor,
        layers: Vec<Descriptor>,
    },
    /// Legacy schema1; layers listed newest first
    V1 {
        fs_layers: Vec<String>,
        throwaway: Vec<bool>,
    },
}

impl ImageManifest {
    /// Layers in base-to-top order, excluding empty and foreign layers.
    pub fn layers(&self) -> Vec<Layer> {
        match self {
            ImageManifest::V2 { layers, .. } => layers
                .iter()
                .filter(|l| l.digest != EMPTY_LAYER_DIGEST && !l.is_foreign())
                .map(|l| Layer {
                    digest: l.digest.clone(),
                    size: l.size,
                })
                .collect(),
            ImageManifest::V1 {
                fs_layers,
                throwaway,
            } => fs_layers
                .iter()
                .enumerate()
                .rev()
                .filter(|(i, digest)| {
                    !throwaway.get(*i).copied().unwrap_or(false)
                        && digest.as_str() != EMPTY_LAYER_DIGEST
                })
                .map(|(_, digest)| Layer {
                    digest: digest.clone(),
                    size: 0,
                })
                .collect(),
        }
    }

    /// Every blob the registry holds for the manifest, config first, empty
    /// layers included. Foreign layers are skipped.
    pub fn blobs(&self) -> Result<Vec<Descriptor>> {
        match self {
            ImageManifest::V2 { config, layers, .. } => Ok(std::iter::once(config)
                .chain(layers.iter().filter(|l| !l.is_foreign()))
                .cloned()
                .collect()),
            ImageManifest::V1 { .. } => Err(RelayError::ManifestDecode(
                "schema1 manifests cannot be transferred".to_string(),
            )),
        }
    }

    /// Config descriptor; schema1 has none.
    pub fn config(&self) -> Option<&Descriptor> {
        match self {
            ImageManifest::V2 { config, .. } => Some(config),
            ImageManifest::V1 { .. } => None,
        }
    }

    pub fn media_type(&self) -> &str {
        match self {
            ImageManifest::V2 { media_type, .. } => media_type,
            ImageManifest::V1 { .. } => DOCKER_MANIFEST_V1_SIGNED,
        }
    }
}

/// A multi-platform manifest list or OCI index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestList {
    pub media_type: String,
    pub manifests: Vec<Descriptor>,
}

impl ManifestList {
    /// Entry matching `os`/`architecture` and, when given, `variant`.
    pub fn select_platform(
        &self,
        os: &str,
        architecture: &str,
        variant: Option<&str>,
    ) -> Option<&Descriptor> {
        self.manifests.iter().find(|entry| {
            entry.platform.as_ref().map_or(false, |p| {
                p.os == os
                    && p.architecture == architecture
                    && variant.map_or(true, |v| p.variant.as_deref() == Some(v))
            })
        })
    }

    /// Entry for linux on the host architecture.
    pub fn default_platform(&self) -> Option<&Descriptor> {
        self.select_platform("linux", host_architecture(), None)
    }
}

/// Decoded manifest payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestKind {
    Image(ImageManifest),
    List(ManifestList),
}

impl ManifestKind {
    pub fn is_list(&self) -> bool {
        matches!(self, ManifestKind::List(_))
    }
}

/// Wire shape covering every supported format.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    #[serde(default)]
    schema_version: u32,
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    manifests: Option<Vec<Descriptor>>,
    #[serde(default)]
    config: Option<Descriptor>,
    #[serde(default)]
    layers: Option<Vec<Descriptor>>,
    #[serde(default)]
    fs_layers: Option<Vec<RawFsLayer>>,
    #[serde(default)]
    history: Option<Vec<RawHistory>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFsLayer {
    blob_sum: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHistory {
    #[serde(default)]
    v1_compatibility: String,
}

#[derive(Debug, Deserialize)]
struct V1Compatibility {
    #[serde(default)]
    throwaway: bool,
}

/// Decode manifest bytes.
///
/// The `mediaType` field decides the format when present; otherwise the
/// structure does (`manifests`, `layers`, or `fsLayers`).
pub fn parse_manifest(bytes: &[u8]) -> Result<ManifestKind> {
    let raw: RawManifest = serde_json::from_slice(bytes)
        .map_err(|e| RelayError::ManifestDecode(format!("invalid manifest JSON: {}", e)))?;

    let media_type = raw.media_type.clone().unwrap_or_default();
    let is_list = match media_type.as_str() {
        DOCKER_MANIFEST_LIST | OCI_INDEX => true,
        DOCKER_MANIFEST_V2 | OCI_MANIFEST | DOCKER_MANIFEST_V1 | DOCKER_MANIFEST_V1_SIGNED => {
            false
        }
        "" => raw.manifests.is_some(),
        other => {
            return Err(RelayError::ManifestDecode(format!(
                "unsupported manifest media type '{}'",
                other
            )))
        }
    };

    if is_list {
        let manifests = raw.manifests.ok_or_else(|| {
            RelayError::ManifestDecode("manifest list has no 'manifests' field".to_string())
        })?;
        let media_type = if media_type.is_empty() {
            OCI_INDEX.to_string()
        } else {
            media_type
        };
        return Ok(ManifestKind::List(ManifestList {
            media_type,
            manifests,
        }));
    }

    if raw.schema_version == 1 || raw.fs_layers.is_some() {
        let fs_layers: Vec<String> = raw
            .fs_layers
            .ok_or_else(|| {
                RelayError::ManifestDecode("schema1 manifest has no 'fsLayers'".to_string())
            })?
            .into_iter()
            .map(|l| l.blob_sum)
            .collect();
        let throwaway = raw
            .history
            .unwrap_or_default()
            .iter()
            .map(|h| {
                serde_json::from_str::<V1Compatibility>(&h.v1_compatibility)
                    .map(|c| c.throwaway)
                    .unwrap_or(false)
            })
            .collect();
        return Ok(ManifestKind::Image(ImageManifest::V1 {
            fs_layers,
            throwaway,
        }));
    }

    let (Some(config), Some(layers)) = (raw.config, raw.layers) else {
        return Err(RelayError::ManifestDecode(
            "image manifest needs 'config' and 'layers'".to_string(),
        ));
    };
    let media_type = if media_type.is_empty() {
        OCI_MANIFEST.to_string()
    } else {
        media_type
    };
    Ok(ManifestKind::Image(ImageManifest::V2 {
        media_type,
        config,
        layers,
    }))
}

/// Media type declared by a manifest document, if any.
pub fn declared_media_type(bytes: &[u8]) -> Option<String> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Probe {
        media_type: Option<String>,
    }
    serde_json::from_slice::<Probe>(bytes)
        .ok()
        .and_then(|p| p.media_type)
}

/// `sha256:<hex>` content digest of `bytes`.
pub fn manifest_digest(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

/// Registry architecture name of the host CPU.
pub fn host_architecture() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "arm" => "arm",
        "powerpc64" => "ppc64le",
        "s390x" => "s390x",
        "riscv64" => "riscv64",
        other => other,
    }
}
