//! Image byte transfer between registries and OCI image layouts.
//!
//! A transfer reads manifests and blobs from a [`BlobSource`] and writes
//! them to a [`BlobSink`]. Remote registries go through the
//! `oci-distribution` client; local directories use the OCI image layout:
//! - `oci-layout`
//! - `index.json`
//! - `blobs/sha256/...`

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use imgrelay_core::error::{RelayError, Result};
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};
use parking_lot::Mutex;
use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;

use super::copy::ImageTransport;
use super::credentials::RegistryCredentials;
use super::manifest::{
    declared_media_type, manifest_digest, parse_manifest, Descriptor, ManifestKind,
    MANIFEST_MEDIA_TYPES, OCI_INDEX, OCI_MANIFEST,
};
use super::reference::ImageReference;

/// Annotation naming the reference a layout entry was stored under.
const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";
const OCI_LAYOUT_CONTENT: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;

/// Build a registry client; hosts in `insecure` are spoken to over HTTP.
pub(crate) fn registry_client(insecure: &[String]) -> Client {
    let protocol = if insecure.is_empty() {
        ClientProtocol::Https
    } else {
        ClientProtocol::HttpsExcept(insecure.to_vec())
    };
    Client::new(ClientConfig {
        protocol,
        ..Default::default()
    })
}

/// Readable end of a transfer.
#[async_trait]
pub trait BlobSource: Send + Sync {
    /// Human-readable location for logs and errors.
    fn describe(&self) -> String;

    /// Manifest bytes and media type for a tag or digest.
    async fn manifest(&self, reference: &str) -> Result<(Vec<u8>, String)>;

    async fn blob(&self, descriptor: &Descriptor) -> Result<Vec<u8>>;
}

/// Writable end of a transfer.
#[async_trait]
pub trait BlobSink: Send + Sync {
    fn describe(&self) -> String;

    async fn has_blob(&self, _digest: &str) -> Result<bool> {
        Ok(false)
    }

    async fn put_blob(&self, digest: &str, data: &[u8]) -> Result<()>;

    /// Store a manifest. `reference` is `Some` for the top-level manifest
    /// and `None` for children of a list, which are addressed by digest.
    async fn put_manifest(
        &self,
        bytes: &[u8],
        media_type: &str,
        reference: Option<&str>,
    ) -> Result<()>;
}

/// Copy one image from `source` to `sink`.
///
/// With `all_architectures` a manifest list is copied whole; otherwise only
/// the entry for the default platform is copied and becomes the top-level
/// manifest. Returns the digest of the top-level manifest written.
pub async fn transfer_image(
    source: &dyn BlobSource,
    sink: &dyn BlobSink,
    src_reference: &str,
    dest_reference: &str,
    all_architectures: bool,
) -> Result<String> {
    let (bytes, media_type) = source.manifest(src_reference).await?;

    match parse_manifest(&bytes)? {
        ManifestKind::Image(_) => {
            copy_manifest_blobs(source, sink, &bytes).await?;
            sink.put_manifest(&bytes, &media_type, Some(dest_reference))
                .await?;
            Ok(manifest_digest(&bytes))
        }
        ManifestKind::List(list) if all_architectures => {
            for entry in &list.manifests {
                let (child, child_type) = source.manifest(&entry.digest).await?;
                verify_digest(&source.describe(), &entry.digest, &child)?;
                copy_manifest_blobs(source, sink, &child).await?;
                sink.put_manifest(&child, &child_type, None).await?;
                tracing::debug!(
                    digest = %entry.digest,
                    platform = ?entry.platform.as_ref().map(|p| p.to_string()),
                    "Copied platform manifest"
                );
            }
            sink.put_manifest(&bytes, &media_type, Some(dest_reference))
                .await?;
            Ok(manifest_digest(&bytes))
        }
        ManifestKind::List(list) => {
            let entry = list.default_platform().ok_or_else(|| RelayError::Registry {
                registry: source.describe(),
                message: format!(
                    "no image found in manifest list for architecture {}",
                    super::manifest::host_architecture()
                ),
            })?;
            let (child, child_type) = source.manifest(&entry.digest).await?;
            verify_digest(&source.describe(), &entry.digest, &child)?;
            copy_manifest_blobs(source, sink, &child).await?;
            sink.put_manifest(&child, &child_type, Some(dest_reference))
                .await?;
            Ok(entry.digest.clone())
        }
    }
}

async fn copy_manifest_blobs(
    source: &dyn BlobSource,
    sink: &dyn BlobSink,
    manifest_bytes: &[u8],
) -> Result<()> {
    let ManifestKind::Image(manifest) = parse_manifest(manifest_bytes)? else {
        return Err(RelayError::ManifestDecode(
            "manifest list nested inside a manifest list".to_string(),
        ));
    };

    for blob in manifest.blobs()? {
        if sink.has_blob(&blob.digest).await? {
            tracing::debug!(digest = %blob.digest, "Blob already present");
            continue;
        }
        let data = source.blob(&blob).await?;
        verify_digest(&source.describe(), &blob.digest, &data)?;
        tracing::debug!(digest = %blob.digest, size = data.len(), "Copying blob");
        sink.put_blob(&blob.digest, &data).await?;
    }
    Ok(())
}

/// Reject content whose sha256 does not match its descriptor.
fn verify_digest(location: &str, expected: &str, data: &[u8]) -> Result<()> {
    let Some(hex_digest) = expected.strip_prefix("sha256:") else {
        return Ok(());
    };
    let actual = hex::encode(Sha256::digest(data));
    if actual != hex_digest {
        return Err(RelayError::Registry {
            registry: location.to_string(),
            message: format!("digest mismatch: expected {}, got sha256:{}", expected, actual),
        });
    }
    Ok(())
}

fn is_digest(reference: &str) -> bool {
    reference.contains(':')
}

/// One repository on a remote registry.
pub struct RemoteRepository {
    client: Client,
    registry: String,
    repository: String,
    auth: OciRegistryAuth,
    push_authorized: OnceCell<()>,
}

impl RemoteRepository {
    pub fn new(client: Client, image: &ImageReference, credentials: &RegistryCredentials) -> Self {
        Self {
            client,
            registry: image.registry.clone(),
            repository: image.repository.clone(),
            auth: credentials.to_oci_auth(),
            push_authorized: OnceCell::new(),
        }
    }

    fn reference(&self, tag_or_digest: &str) -> Reference {
        if is_digest(tag_or_digest) {
            Reference::with_digest(
                self.registry.clone(),
                self.repository.clone(),
                tag_or_digest.to_string(),
            )
        } else {
            Reference::with_tag(
                self.registry.clone(),
                self.repository.clone(),
                tag_or_digest.to_string(),
            )
        }
    }

    fn error(&self, action: &str, e: impl std::fmt::Display) -> RelayError {
        RelayError::Registry {
            registry: self.registry.clone(),
            message: format!("{} {}: {}", action, self.repository, e),
        }
    }

    async fn authorize_push(&self) -> Result<()> {
        self.push_authorized
            .get_or_try_init(|| async {
                self.client
                    .auth(&self.reference("latest"), &self.auth, RegistryOperation::Push)
                    .await
                    .map(|_| ())
                    .map_err(|e| RelayError::AuthenticationFailed {
                        registry: self.registry.clone(),
                        message: format!("push to {}: {}", self.repository, e),
                    })
            })
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl BlobSource for RemoteRepository {
    fn describe(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    async fn manifest(&self, reference: &str) -> Result<(Vec<u8>, String)> {
        let (bytes, _digest) = self
            .client
            .pull_manifest_raw(&self.reference(reference), &self.auth, MANIFEST_MEDIA_TYPES)
            .await
            .map_err(|e| self.error("pull manifest", e))?;
        let media_type = media_type_of(&bytes)?;
        Ok((bytes, media_type))
    }

    async fn blob(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        let oci_descriptor = OciDescriptor {
            media_type: descriptor.media_type.clone(),
            digest: descriptor.digest.clone(),
            size: descriptor.size as i64,
            ..Default::default()
        };
        let mut data: Vec<u8> = Vec::new();
        self.client
            .pull_blob(&self.reference(&descriptor.digest), &oci_descriptor, &mut data)
            .await
            .map_err(|e| self.error(&format!("pull blob {}", descriptor.digest), e))?;
        Ok(data)
    }
}

#[async_trait]
impl BlobSink for RemoteRepository {
    fn describe(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    async fn put_blob(&self, digest: &str, data: &[u8]) -> Result<()> {
        self.authorize_push().await?;
        self.client
            .push_blob(&self.reference(digest), data, digest)
            .await
            .map_err(|e| self.error(&format!("push blob {}", digest), e))?;
        Ok(())
    }

    async fn put_manifest(
        &self,
        bytes: &[u8],
        media_type: &str,
        reference: Option<&str>,
    ) -> Result<()> {
        self.authorize_push().await?;
        let target = match reference {
            Some(r) => r.to_string(),
            None => manifest_digest(bytes),
        };
        let content_type = HeaderValue::from_str(media_type)
            .map_err(|e| RelayError::ManifestDecode(format!("bad media type '{}': {}", media_type, e)))?;
        let url = self
            .client
            .push_manifest_raw(&self.reference(&target), bytes.to_vec(), content_type)
            .await
            .map_err(|e| self.error(&format!("push manifest {}", target), e))?;
        tracing::debug!(url = %url, "Pushed manifest");
        Ok(())
    }
}

fn media_type_of(bytes: &[u8]) -> Result<String> {
    if let Some(declared) = declared_media_type(bytes) {
        return Ok(declared);
    }
    Ok(match parse_manifest(bytes)? {
        ManifestKind::List(_) => OCI_INDEX.to_string(),
        ManifestKind::Image(m) => m.media_type().to_string(),
    })
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutIndex {
    schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    media_type: Option<String>,
    #[serde(default)]
    manifests: Vec<LayoutEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutEntry {
    media_type: String,
    digest: String,
    size: u64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    annotations: HashMap<String, String>,
}

impl LayoutEntry {
    fn ref_name(&self) -> Option<&str> {
        self.annotations.get(REF_NAME_ANNOTATION).map(|s| s.as_str())
    }
}

/// An OCI image layout directory.
pub struct OciLayout {
    root: PathBuf,
    index_lock: Mutex<()>,
}

impl OciLayout {
    /// `oci:<root>`, used in errors and logs.
    pub fn location(&self) -> String {
        format!("oci:{}", self.root.display())
    }

    /// Open `root`, creating the layout skeleton if absent.
    pub fn create(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root.join("blobs").join("sha256"))?;
        let marker = root.join("oci-layout");
        if !marker.exists() {
            std::fs::write(&marker, OCI_LAYOUT_CONTENT)?;
        }
        let layout = Self::open(root);
        if !layout.index_path().exists() {
            layout.write_index(&LayoutIndex {
                schema_version: 2,
                media_type: Some(OCI_INDEX.to_string()),
                manifests: Vec::new(),
            })?;
        }
        Ok(layout)
    }

    /// Open an existing layout without touching it.
    pub fn open(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            index_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reference of the first top-level manifest: its ref name, else its
    /// digest.
    pub fn root_reference(&self) -> Result<String> {
        let index = self.read_index()?;
        let entry = index.manifests.first().ok_or_else(|| {
            RelayError::ManifestDecode(format!("{} has no manifests", self.index_path().display()))
        })?;
        Ok(entry
            .ref_name()
            .map(|s| s.to_string())
            .unwrap_or_else(|| entry.digest.clone()))
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    fn blob_path(&self, digest: &str) -> PathBuf {
        let hex_digest = digest.strip_prefix("sha256:").unwrap_or(digest);
        self.root.join("blobs").join("sha256").join(hex_digest)
    }

    fn read_index(&self) -> Result<LayoutIndex> {
        let data = std::fs::read_to_string(self.index_path()).map_err(|e| {
            RelayError::ManifestDecode(format!(
                "Failed to read {}: {}",
                self.index_path().display(),
                e
            ))
        })?;
        serde_json::from_str(&data)
            .map_err(|e| RelayError::ManifestDecode(format!("invalid index.json: {}", e)))
    }

    fn write_index(&self, index: &LayoutIndex) -> Result<()> {
        write_atomic(&self.index_path(), serde_json::to_string_pretty(index)?.as_bytes())
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl BlobSource for OciLayout {
    fn describe(&self) -> String {
        self.location()
    }

    async fn manifest(&self, reference: &str) -> Result<(Vec<u8>, String)> {
        let index = self.read_index()?;
        let entry = index
            .manifests
            .iter()
            .find(|e| e.ref_name() == Some(reference) || e.digest == reference);

        let digest = match entry {
            Some(e) => e.digest.clone(),
            None if is_digest(reference) => reference.to_string(),
            None => {
                return Err(RelayError::Registry {
                    registry: self.location(),
                    message: format!("no manifest tagged '{}'", reference),
                })
            }
        };

        let bytes = std::fs::read(self.blob_path(&digest)).map_err(|e| RelayError::Registry {
            registry: self.location(),
            message: format!("read manifest {}: {}", digest, e),
        })?;
        let media_type = match entry {
            Some(e) if !e.media_type.is_empty() => e.media_type.clone(),
            _ => media_type_of(&bytes)?,
        };
        Ok((bytes, media_type))
    }

    async fn blob(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        std::fs::read(self.blob_path(&descriptor.digest)).map_err(|e| RelayError::Registry {
            registry: self.location(),
            message: format!("read blob {}: {}", descriptor.digest, e),
        })
    }
}

#[async_trait]
impl BlobSink for OciLayout {
    fn describe(&self) -> String {
        self.location()
    }

    async fn has_blob(&self, digest: &str) -> Result<bool> {
        Ok(self.blob_path(digest).exists())
    }

    async fn put_blob(&self, digest: &str, data: &[u8]) -> Result<()> {
        write_atomic(&self.blob_path(digest), data)
    }

    async fn put_manifest(
        &self,
        bytes: &[u8],
        media_type: &str,
        reference: Option<&str>,
    ) -> Result<()> {
        let digest = manifest_digest(bytes);
        write_atomic(&self.blob_path(&digest), bytes)?;

        let Some(reference) = reference else {
            return Ok(());
        };

        let _guard = self.index_lock.lock();
        let mut index = self.read_index()?;
        index.manifests.retain(|e| e.ref_name() != Some(reference));
        let mut annotations = HashMap::new();
        annotations.insert(REF_NAME_ANNOTATION.to_string(), reference.to_string());
        index.manifests.push(LayoutEntry {
            media_type: if media_type.is_empty() {
                OCI_MANIFEST.to_string()
            } else {
                media_type.to_string()
            },
            digest,
            size: bytes.len() as u64,
            annotations,
        });
        self.write_index(&index)
    }
}

/// [`ImageTransport`] over `oci-distribution` and OCI layouts.
pub struct OciImageTransport {
    client: Client,
}

impl OciImageTransport {
    pub fn new(insecure_registries: &[String]) -> Self {
        Self {
            client: registry_client(insecure_registries),
        }
    }
}

#[async_trait]
impl ImageTransport for OciImageTransport {
    async fn copy(
        &self,
        src: &ImageReference,
        src_credentials: &RegistryCredentials,
        dest: &ImageReference,
        dest_credentials: &RegistryCredentials,
        all_architectures: bool,
    ) -> Result<()> {
        let source = RemoteRepository::new(self.client.clone(), src, src_credentials);
        let sink = RemoteRepository::new(self.client.clone(), dest, dest_credentials);
        let digest = transfer_image(
            &source,
            &sink,
            src.manifest_reference(),
            dest.manifest_reference(),
            all_architectures,
        )
        .await?;
        tracing::info!(src = %src, dest = %dest, digest = %digest, "Copied image");
        Ok(())
    }

    async fn download_to_layout(
        &self,
        src: &ImageReference,
        src_credentials: &RegistryCredentials,
        layout_dir: &Path,
        all_architectures: bool,
    ) -> Result<()> {
        let source = RemoteRepository::new(self.client.clone(), src, src_credentials);
        let layout = OciLayout::create(layout_dir)?;
        transfer_image(
            &source,
            &layout,
            src.manifest_reference(),
            src.manifest_reference(),
            all_architectures,
        )
        .await?;
        tracing::debug!(src = %src, layout = %layout_dir.display(), "Downloaded image to layout");
        Ok(())
    }

    async fn upload_from_layout(
        &self,
        layout_dir: &Path,
        dest: &ImageReference,
        dest_credentials: &RegistryCredentials,
    ) -> Result<()> {
        let layout = OciLayout::open(layout_dir);
        let sink = RemoteRepository::new(self.client.clone(), dest, dest_credentials);
        let root = layout.root_reference()?;
        // The layout holds exactly what was downloaded; copy it whole.
        transfer_image(&layout, &sink, &root, dest.manifest_reference(), true).await?;
        tracing::debug!(dest = %dest, layout = %layout_dir.display(), "Uploaded image from layout");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::manifest::{DOCKER_MANIFEST_LIST, DOCKER_MANIFEST_V2};

    fn sha(data: &[u8]) -> String {
        manifest_digest(data)
    }

    /// Seed a layout with one image manifest (config + one layer) and
    /// return the manifest bytes.
    async fn seed_image(layout: &OciLayout, layer: &[u8], reference: Option<&str>) -> Vec<u8> {
        let config = br#"{"architecture":"amd64","os":"linux"}"#;
        layout.put_blob(&sha(config), config).await.unwrap();
        layout.put_blob(&sha(layer), layer).await.unwrap();
        let manifest = serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 2,
            "mediaType": DOCKER_MANIFEST_V2,
            "config": {"mediaType": "application/vnd.docker.container.image.v1+json", "digest": sha(config), "size": config.len()},
            "layers": [{"mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip", "digest": sha(layer), "size": layer.len()}]
        }))
        .unwrap();
        layout
            .put_manifest(&manifest, DOCKER_MANIFEST_V2, reference)
            .await
            .unwrap();
        manifest
    }

    #[test]
    fn test_verify_digest() {
        assert!(verify_digest("x", &sha(b"abc"), b"abc").is_ok());
        assert!(verify_digest("x", &sha(b"abc"), b"abd").is_err());
        assert!(verify_digest("x", "sha512:whatever", b"abc").is_ok());
    }

    #[test]
    fn test_create_layout_skeleton() {
        let dir = tempfile::tempdir().unwrap();
        OciLayout::create(dir.path()).unwrap();
        assert!(dir.path().join("oci-layout").exists());
        assert!(dir.path().join("blobs").join("sha256").is_dir());
        let index: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("index.json")).unwrap())
                .unwrap();
        assert_eq!(index["schemaVersion"], 2);
    }

    #[tokio::test]
    async fn test_layout_to_layout_single_image() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let src = OciLayout::create(src_dir.path()).unwrap();
        let manifest = seed_image(&src, b"layer-data", Some("1.0")).await;

        let dst = OciLayout::create(dst_dir.path()).unwrap();
        let digest = transfer_image(&src, &dst, "1.0", "2.0", false).await.unwrap();
        assert_eq!(digest, sha(&manifest));
        assert_eq!(dst.root_reference().unwrap(), "2.0");
        assert!(dst.has_blob(&sha(b"layer-data")).await.unwrap());

        let (bytes, media_type) = dst.manifest("2.0").await.unwrap();
        assert_eq!(bytes, manifest);
        assert_eq!(media_type, DOCKER_MANIFEST_V2);
    }

    #[tokio::test]
    async fn test_manifest_list_all_architectures() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let src = OciLayout::create(src_dir.path()).unwrap();
        let amd = seed_image(&src, b"amd-layer", None).await;
        let arm = seed_image(&src, b"arm-layer", None).await;
        let list = serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 2,
            "mediaType": DOCKER_MANIFEST_LIST,
            "manifests": [
                {"mediaType": DOCKER_MANIFEST_V2, "digest": sha(&amd), "size": amd.len(), "platform": {"os": "linux", "architecture": "amd64"}},
                {"mediaType": DOCKER_MANIFEST_V2, "digest": sha(&arm), "size": arm.len(), "platform": {"os": "linux", "architecture": "arm64"}}
            ]
        }))
        .unwrap();
        src.put_manifest(&list, DOCKER_MANIFEST_LIST, Some("multi"))
            .await
            .unwrap();

        let dst = OciLayout::create(dst_dir.path()).unwrap();
        let digest = transfer_image(&src, &dst, "multi", "multi", true).await.unwrap();
        assert_eq!(digest, sha(&list));
        for blob in [sha(&amd), sha(&arm), sha(b"amd-layer"), sha(b"arm-layer")] {
            assert!(dst.has_blob(&blob).await.unwrap(), "missing {}", blob);
        }
        let (root, media_type) = dst.manifest("multi").await.unwrap();
        assert_eq!(root, list);
        assert_eq!(media_type, DOCKER_MANIFEST_LIST);
    }

    #[tokio::test]
    async fn test_manifest_list_default_platform_only() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let src = OciLayout::create(src_dir.path()).unwrap();
        let native = seed_image(&src, b"native-layer", None).await;
        let other = seed_image(&src, b"other-layer", None).await;
        let arch = super::super::manifest::host_architecture();
        let list = serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 2,
            "mediaType": OCI_INDEX,
            "manifests": [
                {"digest": sha(&other), "size": other.len(), "platform": {"os": "windows", "architecture": arch}},
                {"digest": sha(&native), "size": native.len(), "platform": {"os": "linux", "architecture": arch}}
            ]
        }))
        .unwrap();
        src.put_manifest(&list, OCI_INDEX, Some("v1")).await.unwrap();

        let dst = OciLayout::create(dst_dir.path()).unwrap();
        let digest = transfer_image(&src, &dst, "v1", "v1", false).await.unwrap();
        assert_eq!(digest, sha(&native));
        assert!(dst.has_blob(&sha(b"native-layer")).await.unwrap());
        assert!(!dst.has_blob(&sha(b"other-layer")).await.unwrap());
        assert_eq!(dst.manifest("v1").await.unwrap().0, native);
    }

    #[tokio::test]
    async fn test_missing_tag() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OciLayout::create(dir.path()).unwrap();
        assert!(layout.manifest("nope").await.is_err());
        assert!(layout.root_reference().is_err());
    }

    #[test]
    fn test_manifest_content_type_matches_client() {
        let client = registry_client(&[]);
        let reference: Reference = "localhost:5000/app:1".parse().unwrap();
        let content_type = HeaderValue::from_static(OCI_MANIFEST);
        // Built, never polled.
        drop(client.push_manifest_raw(&reference, Vec::new(), content_type));
    }

    #[tokio::test]
    async fn test_layout_errors_name_the_layout() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OciLayout::create(dir.path()).unwrap();
        let location = format!("oci:{}", dir.path().display());
        assert_eq!(layout.location(), location);
        assert_eq!(BlobSource::describe(&layout), location);
        assert_eq!(BlobSink::describe(&layout), location);

        match layout.manifest("nope").await.unwrap_err() {
            RelayError::Registry { registry, message } => {
                assert_eq!(registry, location);
                assert!(message.contains("nope"));
            }
            other => panic!("unexpected error: {}", other),
        }

        let missing = Descriptor {
            digest: sha(b"absent"),
            ..Default::default()
        };
        match layout.blob(&missing).await.unwrap_err() {
            RelayError::Registry { registry, .. } => assert_eq!(registry, location),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_put_manifest_replaces_same_reference() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OciLayout::create(dir.path()).unwrap();
        seed_image(&layout, b"first", Some("latest")).await;
        let second = seed_image(&layout, b"second", Some("latest")).await;
        let index = layout.read_index().unwrap();
        assert_eq!(index.manifests.len(), 1);
        assert_eq!(layout.manifest("latest").await.unwrap().0, second);
    }
}
