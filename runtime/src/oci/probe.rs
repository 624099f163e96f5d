//! Private-image detection.
//!
//! An image is public when its registry serves the manifest without
//! credentials (Docker Hub images use the supplied Docker Hub account to
//! avoid rate limits). Any other failure classifies the image as private,
//! since an unreachable registry cannot be told apart from an auth failure.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use imgrelay_core::classification::{ClassificationCache, ImageInfo};
use imgrelay_core::config::ProbeConfig;
use imgrelay_core::error::Result;
use oci_distribution::Client;

use super::credentials::RegistryCredentials;
use super::manifest::{host_architecture, parse_manifest, ManifestKind, MANIFEST_MEDIA_TYPES};
use super::reference::ImageReference;
use super::transfer::registry_client;

/// Outcome of a failed manifest open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// Connection closed mid-response
    Eof,
    /// Manifest list has no entry for the host platform
    NoMatchingArchitecture,
    Other(String),
}

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeError::Eof => write!(f, "EOF"),
            ProbeError::NoMatchingArchitecture => write!(
                f,
                "no image found in manifest list for architecture {}",
                host_architecture()
            ),
            ProbeError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

/// Opens an image manifest on its registry.
#[async_trait]
pub trait ManifestProbe: Send + Sync {
    async fn open(
        &self,
        image: &ImageReference,
        credentials: &RegistryCredentials,
    ) -> std::result::Result<(), ProbeError>;
}

/// [`ManifestProbe`] backed by `oci-distribution`.
pub struct OciManifestProbe {
    client: Client,
}

impl OciManifestProbe {
    pub fn new(insecure_registries: &[String]) -> Self {
        Self {
            client: registry_client(insecure_registries),
        }
    }
}

#[async_trait]
impl ManifestProbe for OciManifestProbe {
    async fn open(
        &self,
        image: &ImageReference,
        credentials: &RegistryCredentials,
    ) -> std::result::Result<(), ProbeError> {
        let reference = image
            .to_oci_reference()
            .map_err(|e| ProbeError::Other(e.to_string()))?;
        let (bytes, _digest) = self
            .client
            .pull_manifest_raw(&reference, &credentials.to_oci_auth(), MANIFEST_MEDIA_TYPES)
            .await
            .map_err(|e| classify_error(&e.to_string()))?;

        match parse_manifest(&bytes).map_err(|e| ProbeError::Other(e.to_string()))? {
            ManifestKind::List(list) if list.default_platform().is_none() => {
                Err(ProbeError::NoMatchingArchitecture)
            }
            _ => Ok(()),
        }
    }
}

/// Map a client error message onto a probe outcome.
fn classify_error(message: &str) -> ProbeError {
    let lower = message.to_ascii_lowercase();
    if lower.ends_with("eof")
        || lower.contains("unexpected eof")
        || lower.contains("connection closed before message completed")
        || lower.contains("incomplete message")
    {
        ProbeError::Eof
    } else if lower.contains("no image found in manifest list for architecture") {
        ProbeError::NoMatchingArchitecture
    } else {
        ProbeError::Other(message.to_string())
    }
}

/// Probe tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOptions {
    /// Default in-flight limit for [`PrivacyProbe::classify_all`]
    pub concurrency: usize,
    pub eof_attempts: u32,
    pub eof_backoff: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self::from(&ProbeConfig::default())
    }
}

impl From<&ProbeConfig> for ProbeOptions {
    fn from(config: &ProbeConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            eof_attempts: config.eof_attempts.max(1),
            eof_backoff: Duration::from_secs(config.eof_backoff_secs),
        }
    }
}

/// Classifies images as public or private.
pub struct PrivacyProbe {
    probe: Arc<dyn ManifestProbe>,
    options: ProbeOptions,
    docker_hub: RegistryCredentials,
}

impl PrivacyProbe {
    pub fn new(probe: Arc<dyn ManifestProbe>, options: ProbeOptions) -> Self {
        Self {
            probe,
            options,
            docker_hub: RegistryCredentials::anonymous(),
        }
    }

    /// Credentials used for Docker Hub images.
    pub fn with_docker_hub_credentials(mut self, credentials: RegistryCredentials) -> Self {
        self.docker_hub = credentials;
        self
    }

    pub fn options(&self) -> &ProbeOptions {
        &self.options
    }

    /// Whether `image` needs private-registry credentials.
    ///
    /// EOF is retried; when attempts run out, or on any other failure, the
    /// image is private. Only a malformed reference is an error.
    pub async fn is_private(&self, image: &str) -> Result<bool> {
        let reference = ImageReference::parse(image)?;
        let credentials = if reference.is_docker_hub() {
            self.docker_hub.clone()
        } else {
            RegistryCredentials::anonymous()
        };

        let attempts = self.options.eof_attempts.max(1);
        for attempt in 1..=attempts {
            match self.probe.open(&reference, &credentials).await {
                Ok(()) => return Ok(false),
                Err(ProbeError::NoMatchingArchitecture) => {
                    tracing::debug!(image, "No manifest for host architecture, image is public");
                    return Ok(false);
                }
                Err(ProbeError::Eof) => {
                    tracing::debug!(image, attempt, "EOF while probing image");
                    if attempt < attempts {
                        tokio::time::sleep(self.options.eof_backoff).await;
                    }
                }
                Err(ProbeError::Other(message)) => {
                    tracing::debug!(image, error = %message, "Image is private");
                    return Ok(true);
                }
            }
        }

        tracing::warn!(image, attempts, "Registry kept closing the connection, treating image as private");
        Ok(true)
    }

    /// Classify every image not already in `cache`, at most `limit` at a
    /// time.
    ///
    /// Waits for all classifications; the first error is returned after the
    /// rest have finished.
    pub async fn classify_all(
        &self,
        images: &[String],
        cache: &ClassificationCache,
        limit: usize,
    ) -> Result<()> {
        let mut seen = HashSet::new();
        let pending: Vec<&str> = images
            .iter()
            .map(|s| s.as_str())
            .filter(|image| !cache.contains(image) && seen.insert(*image))
            .collect();

        if pending.is_empty() {
            return Ok(());
        }
        tracing::debug!(count = pending.len(), limit, "Classifying images");

        let results: Vec<Result<()>> = stream::iter(pending)
            .map(|image| async move {
                let is_private = self.is_private(image).await?;
                cache.insert(image, ImageInfo { is_private });
                Ok(())
            })
            .buffer_unordered(limit.max(1))
            .collect()
            .await;

        results.into_iter().collect()
    }
}
