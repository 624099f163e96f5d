//! `imgrelay push` command - Copy an image between registries.

use std::sync::Arc;

use clap::Args;
use imgrelay_core::config::RelayConfig;
use imgrelay_runtime::{
    CopyPipeline, ImageReference, OciImageTransport, PushImageOptions, RegistryCredentials,
    RetryPolicy,
};

#[derive(Args)]
pub struct PushArgs {
    /// Source image reference
    pub src: String,

    /// Destination image reference
    pub dest: String,

    /// Source registry username (default: stored credentials)
    #[arg(long)]
    pub src_username: Option<String>,

    /// Source registry password
    #[arg(long)]
    pub src_password: Option<String>,

    /// Destination registry username (default: stored credentials)
    #[arg(long)]
    pub dest_username: Option<String>,

    /// Destination registry password
    #[arg(long)]
    pub dest_password: Option<String>,

    /// Attempts before giving up (default: push.attempts from config)
    #[arg(long)]
    pub attempts: Option<u32>,
}

pub async fn execute(args: PushArgs, config: &RelayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let src_credentials = credentials_for(
        &args.src,
        args.src_username.as_deref(),
        args.src_password.as_deref(),
    )?;
    let dest_credentials = credentials_for(
        &args.dest,
        args.dest_username.as_deref(),
        args.dest_password.as_deref(),
    )?;

    let mut retry = RetryPolicy::from(&config.push);
    if let Some(attempts) = args.attempts {
        retry.attempts = attempts.max(1);
    }

    let pipeline = CopyPipeline::new(
        Arc::new(OciImageTransport::new(&config.insecure_registries)),
        retry,
    );
    let opts = PushImageOptions::new(args.src.clone(), args.dest.clone())
        .with_src_credentials(src_credentials)
        .with_dest_credentials(dest_credentials);

    println!("Pushing {} to {}...", args.src, args.dest);
    pipeline.push_image(&opts).await?;
    println!("Pushed: {}", args.dest);
    Ok(())
}

/// Explicit flags win; otherwise the credential store for the image's host.
fn credentials_for(
    image: &str,
    username: Option<&str>,
    password: Option<&str>,
) -> Result<RegistryCredentials, Box<dyn std::error::Error>> {
    let explicit = RegistryCredentials::from_parts(username, password);
    if !explicit.is_anonymous() {
        return Ok(explicit);
    }
    let reference = ImageReference::parse(image)?;
    Ok(RegistryCredentials::from_credential_store(&reference.registry))
}
