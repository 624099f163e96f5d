//! `imgrelay layers` command - List image layers from an air-gap bundle.

use std::path::PathBuf;

use clap::Args;
use imgrelay_core::config::{RelayConfig, TempRegistryConfig};
use imgrelay_runtime::TempRegistry;

use crate::output;

#[derive(Args)]
pub struct LayersArgs {
    /// Image reference as recorded in the bundle
    pub image: String,

    /// Registry storage root extracted from the bundle
    #[arg(long, required_unless_present = "port", conflicts_with = "port")]
    pub root_dir: Option<PathBuf>,

    /// Query a registry already serving on this localhost port
    #[arg(long)]
    pub port: Option<u16>,

    /// Seconds to wait for the local registry to answer
    #[arg(long, conflicts_with = "port")]
    pub ready_timeout: Option<u64>,
}

pub async fn execute(args: LayersArgs, config: &RelayConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Dropping the registry stops any process started here.
    let registry = match (args.port, &args.root_dir) {
        (Some(port), _) => TempRegistry::attach(port),
        (None, Some(root_dir)) => {
            let mut registry = TempRegistry::new(&TempRegistryConfig {
                binary: config.temp_registry.binary.clone(),
                ready_timeout_secs: args
                    .ready_timeout
                    .unwrap_or(config.temp_registry.ready_timeout_secs),
            });
            registry.start(root_dir).await?;
            registry
        }
        (None, None) => return Err("either --root-dir or --port is required".into()),
    };

    let layers = registry.get_image_layers(&args.image).await?;

    let mut table = output::new_table(&["DIGEST", "SIZE"]);
    let mut total = 0u64;
    for layer in &layers {
        total += layer.size;
        table.add_row([layer.digest.clone(), output::format_bytes(layer.size)]);
    }
    println!("{table}");
    println!(
        "{} layer(s), {} total",
        layers.len(),
        output::format_bytes(total)
    );
    Ok(())
}
