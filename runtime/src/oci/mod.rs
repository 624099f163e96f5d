//! Registry rewrite and transfer engine.
//!
//! Components, leaves first:
//!
//! - `reference`: image reference parsing and normalization
//! - `credentials`, `endpoint`, `ecr`, `auth`: registry credentials and
//!   the challenge/response access check
//! - `manifest`: manifest and manifest-list decoding
//! - `temp_registry`: ephemeral local registry over an air-gap bundle
//! - `rewrite`, `plan`: destination names and kustomize substitutions
//! - `probe`: concurrent private-image classification
//! - `transfer`, `copy`: image byte transfer with retry and fallback
//! - `airgap`: pushing a bundle through the local registry
//!
//! ```text
//!  image strings ──► probe ──► rewrite/plan ──► copy ──► destination
//!                      │                          ▲
//!                    auth                   temp_registry (air-gap)
//! ```

pub mod airgap;
pub mod auth;
pub mod copy;
pub mod credentials;
pub mod ecr;
pub mod endpoint;
pub mod manifest;
pub mod plan;
pub mod probe;
pub mod reference;
pub mod rewrite;
pub mod temp_registry;
pub mod transfer;

pub use airgap::{push_airgap_images, AirgapPushOptions};
pub use auth::{parse_www_authenticate, Challenge, RegistryAuthClient};
pub use copy::{CopyPipeline, ImageTransport, PushImageOptions, RetryPolicy};
pub use credentials::{CredentialStore, RegistryCredentials};
pub use ecr::{AwsEcrTokenSource, EcrEndpoint, EcrTokenSource};
pub use endpoint::{auth_host, normalize_endpoint, RegistryOptions};
pub use manifest::{parse_manifest, Layer, ManifestKind, MANIFEST_MEDIA_TYPES};
pub use plan::{plan_rewrites, private_images_to_proxy, to_kustomize_yaml};
pub use probe::{ManifestProbe, OciManifestProbe, PrivacyProbe, ProbeError, ProbeOptions};
pub use reference::{strip_tag_and_digest, ImageReference};
pub use rewrite::{build_alt_names, rewrite, rewrite_private_image, RewrittenImage};
pub use temp_registry::{RegistryState, TempRegistry};
pub use transfer::{transfer_image, BlobSink, BlobSource, OciImageTransport, OciLayout};
