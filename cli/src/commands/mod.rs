//! CLI command definitions and dispatch.

mod airgap_push;
mod alt_names;
mod check_access;
mod classify;
mod layers;
mod login;
mod push;
mod rewrite;

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use imgrelay_core::config::RelayConfig;
use imgrelay_runtime::RegistryOptions;

/// imgrelay - rewrite, classify and relay container images between registries.
#[derive(Parser)]
#[command(name = "imgrelay", version, about)]
pub struct Cli {
    /// Configuration file (default: ~/.imgrelay/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Print the destination of each image in a registry
    Rewrite(rewrite::RewriteArgs),
    /// List every spelling an image may appear under, rewritten
    AltNames(alt_names::AltNamesArgs),
    /// Classify images as public or private
    Classify(classify::ClassifyArgs),
    /// Verify credentials against a registry
    CheckAccess(check_access::CheckAccessArgs),
    /// List the layers of an image in an air-gap bundle
    Layers(layers::LayersArgs),
    /// Copy an image between registries
    Push(push::PushArgs),
    /// Push the images of an extracted air-gap bundle
    AirgapPush(airgap_push::AirgapPushArgs),
    /// Store registry credentials
    Login(login::LoginArgs),
}

/// Destination registry flags shared by several commands.
#[derive(Args, Debug, Clone)]
pub struct RegistryArgs {
    /// Registry host (and optional port)
    #[arg(long)]
    pub registry: String,

    /// Path prefix under the registry host
    #[arg(long, default_value = "")]
    pub namespace: String,

    /// Registry username
    #[arg(short, long)]
    pub username: Option<String>,

    /// Registry password
    #[arg(short, long)]
    pub password: Option<String>,
}

impl RegistryArgs {
    pub(crate) fn to_options(&self) -> RegistryOptions {
        RegistryOptions::new(&self.registry, &self.namespace).with_credentials(
            self.username.as_deref().unwrap_or(""),
            self.password.as_deref().unwrap_or(""),
        )
    }
}

/// Return the path to the default config file (~/.imgrelay/config.yaml).
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".imgrelay"))
        .unwrap_or_else(|| PathBuf::from(".imgrelay"))
        .join("config.yaml")
}

/// Load the config file, then apply `IMGRELAY_*` overrides.
pub fn load_config(path: Option<&Path>) -> Result<RelayConfig, Box<dyn std::error::Error>> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);
    Ok(RelayConfig::load(&path)?.from_env_overrides()?)
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli, config: &RelayConfig) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Rewrite(args) => rewrite::execute(args).await,
        Command::AltNames(args) => alt_names::execute(args).await,
        Command::Classify(args) => classify::execute(args, config).await,
        Command::CheckAccess(args) => check_access::execute(args, config).await,
        Command::Layers(args) => layers::execute(args, config).await,
        Command::Push(args) => push::execute(args, config).await,
        Command::AirgapPush(args) => airgap_push::execute(args, config).await,
        Command::Login(args) => login::execute(args).await,
    }
}
