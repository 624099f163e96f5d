//! `imgrelay airgap-push` command - Push an extracted air-gap bundle.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use imgrelay_core::config::RelayConfig;
use imgrelay_core::progress::WriterSink;
use imgrelay_runtime::oci::to_kustomize_yaml;
use imgrelay_runtime::{
    push_airgap_images, AirgapPushOptions, CopyPipeline, OciImageTransport, RetryPolicy,
    TempRegistry,
};

use super::RegistryArgs;

#[derive(Args)]
pub struct AirgapPushArgs {
    /// Registry storage root extracted from the bundle
    #[arg(long)]
    pub root_dir: PathBuf,

    /// Images contained in the bundle
    #[arg(required = true)]
    pub images: Vec<String>,

    #[command(flatten)]
    pub dest: RegistryArgs,

    /// Write the kustomize image substitutions to this file
    #[arg(long)]
    pub kustomize_out: Option<PathBuf>,
}

pub async fn execute(
    args: AirgapPushArgs,
    config: &RelayConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let opts = AirgapPushOptions {
        root_dir: args.root_dir.clone(),
        images: args.images.clone(),
        dest: args.dest.to_options(),
    };
    let retry = RetryPolicy::from(&config.push);
    let sink = WriterSink::new(std::io::stdout());
    let mut registry = TempRegistry::new(&config.temp_registry);

    let substitutions = push_airgap_images(&mut registry, &opts, &sink, |endpoint| {
        let mut insecure = config.insecure_registries.clone();
        insecure.push(endpoint.to_string());
        CopyPipeline::new(Arc::new(OciImageTransport::new(&insecure)), retry)
    })
    .await?;

    if let Some(path) = &args.kustomize_out {
        std::fs::write(path, to_kustomize_yaml(&substitutions)?)?;
        tracing::info!(path = %path.display(), count = substitutions.len(), "Wrote image substitutions");
    }
    Ok(())
}
