//! `imgrelay classify` command - Public/private image classification.
//!
//! Optionally persists results in an installation record and prints the
//! proxy substitutions for the private images.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use imgrelay_core::classification::InstallationRecord;
use imgrelay_core::config::RelayConfig;
use imgrelay_runtime::oci::endpoint::DOCKER_HUB_AUTH_HOST;
use imgrelay_runtime::oci::private_images_to_proxy;
use imgrelay_runtime::{
    OciManifestProbe, PrivacyProbe, ProbeOptions, RegistryCredentials, RegistryOptions,
};

use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct ClassifyArgs {
    /// Image references
    #[arg(required = true)]
    pub images: Vec<String>,

    /// Installation record to seed from and update
    #[arg(long)]
    pub record: Option<PathBuf>,

    /// Maximum concurrent probes (default: probe.concurrency from config)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Registry that serves the private images directly
    #[arg(long, requires = "app_slug")]
    pub source_registry: Option<String>,

    /// Proxy registry fronting the source registry
    #[arg(long, requires = "source_registry")]
    pub proxy: Option<String>,

    /// Custom domain aliased to the source registry
    #[arg(long, default_value = "")]
    pub upstream: String,

    /// Application slug used in proxy paths
    #[arg(long)]
    pub app_slug: Option<String>,

    /// Output format for proxy substitutions
    #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
    pub output: OutputFormat,
}

pub async fn execute(
    args: ClassifyArgs,
    config: &RelayConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut record = match &args.record {
        Some(path) => InstallationRecord::load(path)?,
        None => InstallationRecord::default(),
    };
    let cache = record.to_cache();

    let options = ProbeOptions::from(&config.probe);
    let limit = args.concurrency.unwrap_or(options.concurrency);
    let probe = PrivacyProbe::new(
        Arc::new(OciManifestProbe::new(&config.insecure_registries)),
        options,
    )
    .with_docker_hub_credentials(RegistryCredentials::from_credential_store(
        DOCKER_HUB_AUTH_HOST,
    ));

    probe.classify_all(&args.images, &cache, limit).await?;

    let mut table = output::new_table(&["IMAGE", "PRIVATE"]);
    for image in &args.images {
        let private = cache
            .get(image)
            .map(|info| info.is_private.to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row([image.clone(), private]);
    }
    println!("{table}");

    if let Some(path) = &args.record {
        record.absorb(&cache);
        record.save(path)?;
        tracing::info!(path = %path.display(), images = record.images.len(), "Installation record saved");
    }

    if let (Some(source), Some(app_slug)) = (&args.source_registry, &args.app_slug) {
        let src = RegistryOptions::new(source, "")
            .with_proxy(args.proxy.as_deref().unwrap_or(""), &args.upstream);
        let substitutions = private_images_to_proxy(&args.images, &cache, &src, app_slug)?;
        if !substitutions.is_empty() {
            println!();
            output::print_substitutions(&substitutions, args.output)?;
        }
    }

    Ok(())
}
