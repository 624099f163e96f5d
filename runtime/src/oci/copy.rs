//! Image copy pipeline.
//!
//! Each attempt tries a direct registry-to-registry copy, then falls back
//! to downloading into a temporary OCI layout and uploading from it.
//! Attempts are retried with a fixed backoff.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use imgrelay_core::config::PushConfig;
use imgrelay_core::error::{RelayError, Result};

use super::credentials::RegistryCredentials;
use super::ecr::{resolve_ecr_credentials, AwsEcrTokenSource, EcrTokenSource};
use super::reference::ImageReference;

/// Moves image bytes between registries.
#[async_trait]
pub trait ImageTransport: Send + Sync {
    /// Copy directly from `src` to `dest`.
    async fn copy(
        &self,
        src: &ImageReference,
        src_credentials: &RegistryCredentials,
        dest: &ImageReference,
        dest_credentials: &RegistryCredentials,
        all_architectures: bool,
    ) -> Result<()>;

    /// Download `src` into an OCI layout at `layout_dir`.
    async fn download_to_layout(
        &self,
        src: &ImageReference,
        src_credentials: &RegistryCredentials,
        layout_dir: &Path,
        all_architectures: bool,
    ) -> Result<()>;

    /// Upload the image stored in `layout_dir` to `dest`.
    async fn upload_from_layout(
        &self,
        layout_dir: &Path,
        dest: &ImageReference,
        dest_credentials: &RegistryCredentials,
    ) -> Result<()>;
}

/// Attempt cap and delay between failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_secs(10),
        }
    }
}

impl From<&PushConfig> for RetryPolicy {
    fn from(config: &PushConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            backoff: Duration::from_secs(config.backoff_secs),
        }
    }
}

/// One image to push.
#[derive(Debug, Clone)]
pub struct PushImageOptions {
    pub src_image: String,
    pub dest_image: String,
    pub src_credentials: RegistryCredentials,
    pub dest_credentials: RegistryCredentials,
}

impl PushImageOptions {
    pub fn new(src_image: impl Into<String>, dest_image: impl Into<String>) -> Self {
        Self {
            src_image: src_image.into(),
            dest_image: dest_image.into(),
            src_credentials: RegistryCredentials::anonymous(),
            dest_credentials: RegistryCredentials::anonymous(),
        }
    }

    pub fn with_src_credentials(mut self, credentials: RegistryCredentials) -> Self {
        self.src_credentials = credentials;
        self
    }

    pub fn with_dest_credentials(mut self, credentials: RegistryCredentials) -> Self {
        self.dest_credentials = credentials;
        self
    }
}

/// Pushes images through an [`ImageTransport`] with retry.
pub struct CopyPipeline {
    transport: Arc<dyn ImageTransport>,
    ecr: Arc<dyn EcrTokenSource>,
    retry: RetryPolicy,
}

impl CopyPipeline {
    pub fn new(transport: Arc<dyn ImageTransport>, retry: RetryPolicy) -> Self {
        Self::with_ecr_source(transport, retry, Arc::new(AwsEcrTokenSource))
    }

    pub fn with_ecr_source(
        transport: Arc<dyn ImageTransport>,
        retry: RetryPolicy,
        ecr: Arc<dyn EcrTokenSource>,
    ) -> Self {
        Self {
            transport,
            ecr,
            retry,
        }
    }

    /// Copy one image, retrying failed attempts.
    ///
    /// Every architecture is copied only when the source is pinned by
    /// digest; tag references copy the default platform.
    pub async fn push_image(&self, opts: &PushImageOptions) -> Result<()> {
        let src = ImageReference::parse(&opts.src_image)?;
        let dest = ImageReference::parse(&opts.dest_image)?;
        let all_architectures = src.digest.is_some();
        let attempts = self.retry.attempts.max(1);

        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.attempt(&src, &dest, opts, all_architectures).await {
                Ok(()) => {
                    tracing::info!(src = %src, dest = %dest, attempt, "Image pushed");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        src = %src,
                        dest = %dest,
                        attempt,
                        attempts,
                        error = %e,
                        "Image push attempt failed"
                    );
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.retry.backoff).await;
                    }
                }
            }
        }

        Err(RelayError::Transfer {
            image: opts.src_image.clone(),
            attempts,
            message: format!(
                "push to {}: {}",
                opts.dest_image,
                last_error.map(|e| e.to_string()).unwrap_or_default()
            ),
        })
    }

    async fn attempt(
        &self,
        src: &ImageReference,
        dest: &ImageReference,
        opts: &PushImageOptions,
        all_architectures: bool,
    ) -> Result<()> {
        let dest_credentials =
            resolve_ecr_credentials(&dest.registry, &opts.dest_credentials, self.ecr.as_ref())
                .await?;

        let direct = self
            .transport
            .copy(
                src,
                &opts.src_credentials,
                dest,
                &dest_credentials,
                all_architectures,
            )
            .await;
        let direct_error = match direct {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        tracing::debug!(
            src = %src,
            error = %direct_error,
            "Direct copy failed, staging through local layout"
        );

        let staging = tempfile::Builder::new().prefix("imgrelay-push-").tempdir()?;
        self.transport
            .download_to_layout(src, &opts.src_credentials, staging.path(), all_architectures)
            .await
            .map_err(|e| fallback_error("download", &direct_error, e))?;
        self.transport
            .upload_from_layout(staging.path(), dest, &dest_credentials)
            .await
            .map_err(|e| fallback_error("upload", &direct_error, e))
    }
}

fn fallback_error(stage: &str, direct: &RelayError, fallback: RelayError) -> RelayError {
    RelayError::Other(format!(
        "direct copy failed ({}); fallback {} failed ({})",
        direct, stage, fallback
    ))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Scripted transport that records calls.
    #[derive(Default)]
    pub struct FakeTransport {
        /// Direct copies to fail before succeeding
        pub copy_failures: Mutex<u32>,
        /// Fail every fallback download
        pub download_fails: bool,
        pub calls: Mutex<Vec<String>>,
        pub credentials_seen: Mutex<Vec<RegistryCredentials>>,
    }

    impl FakeTransport {
        pub fn failing_copies(n: u32) -> Self {
            Self {
                copy_failures: Mutex::new(n),
                ..Default::default()
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl ImageTransport for FakeTransport {
        async fn copy(
            &self,
            src: &ImageReference,
            _src_credentials: &RegistryCredentials,
            dest: &ImageReference,
            dest_credentials: &RegistryCredentials,
            all_architectures: bool,
        ) -> Result<()> {
            self.calls
                .lock()
                .push(format!("copy {} {} all={}", src, dest, all_architectures));
            self.credentials_seen.lock().push(dest_credentials.clone());
            let mut failures = self.copy_failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(RelayError::Registry {
                    registry: dest.registry.clone(),
                    message: "manifest format rejected".to_string(),
                });
            }
            Ok(())
        }

        async fn download_to_layout(
            &self,
            src: &ImageReference,
            _src_credentials: &RegistryCredentials,
            layout_dir: &Path,
            all_architectures: bool,
        ) -> Result<()> {
            assert!(layout_dir.is_dir());
            self.calls
                .lock()
                .push(format!("download {} all={}", src, all_architectures));
            if self.download_fails {
                return Err(RelayError::RegistryUnreachable {
                    registry: src.registry.clone(),
                    message: "EOF".to_string(),
                });
            }
            Ok(())
        }

        async fn upload_from_layout(
            &self,
            _layout_dir: &Path,
            dest: &ImageReference,
            _dest_credentials: &RegistryCredentials,
        ) -> Result<()> {
            self.calls.lock().push(format!("upload {}", dest));
            Ok(())
        }
    }
}
