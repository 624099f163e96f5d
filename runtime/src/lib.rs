//! imgrelay Runtime - image rewrite and transfer engine.
//!
//! Parses and rewrites image references, classifies private images,
//! checks registry access, serves air-gap bundles from an ephemeral
//! registry and copies images between registries.

#![allow(clippy::result_large_err)]

pub mod oci;

// Re-export common types
pub use oci::{
    build_alt_names, plan_rewrites, push_airgap_images, rewrite, rewrite_private_image,
    AirgapPushOptions, CopyPipeline, ImageReference, Layer, OciImageTransport, OciManifestProbe,
    PrivacyProbe, ProbeOptions, PushImageOptions, RegistryAuthClient, RegistryCredentials,
    RegistryOptions, RetryPolicy, RewrittenImage, TempRegistry,
};

/// imgrelay runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
