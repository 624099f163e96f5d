//! `imgrelay check-access` command - Verify registry credentials.

use std::time::Duration;

use clap::Args;
use imgrelay_core::config::RelayConfig;
use imgrelay_runtime::RegistryAuthClient;

#[derive(Args)]
pub struct CheckAccessArgs {
    /// Registry endpoint (e.g. "registry.example.com", "https://host:5000/v2/")
    pub endpoint: String,

    /// Username
    #[arg(short, long, default_value = "")]
    pub username: String,

    /// Password
    #[arg(short, long, default_value = "")]
    pub password: String,
}

pub async fn execute(
    args: CheckAccessArgs,
    config: &RelayConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = RegistryAuthClient::new(Duration::from_secs(config.auth.timeout_secs))?;
    client
        .check_access(&args.endpoint, &args.username, &args.password)
        .await?;

    println!("Access granted to {}", args.endpoint);
    Ok(())
}
