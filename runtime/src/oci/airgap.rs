//! Air-gap bundle push.
//!
//! Serves an extracted bundle from a [`TempRegistry`] and pushes each image
//! to the destination registry, one at a time.

use std::path::PathBuf;

use imgrelay_core::error::Result;
use imgrelay_core::progress::{ImageStatus, ProgressReport, ProgressSink};

use super::copy::{CopyPipeline, PushImageOptions};
use super::endpoint::RegistryOptions;
use super::rewrite::{build_alt_names, rewrite, RewrittenImage};
use super::temp_registry::{RegistryState, TempRegistry};

/// What to push and where.
#[derive(Debug, Clone)]
pub struct AirgapPushOptions {
    /// Registry storage root extracted from the bundle
    pub root_dir: PathBuf,
    pub images: Vec<String>,
    pub dest: RegistryOptions,
}

/// Stops the registry on every exit path.
struct RunningRegistry<'a>(&'a mut TempRegistry);

impl Drop for RunningRegistry<'_> {
    fn drop(&mut self) {
        self.0.stop();
    }
}

/// Push every bundled image to `opts.dest`.
///
/// `make_pipeline` receives the local registry endpoint once it is up, so
/// the transport can be told to speak plain HTTP to it. Returns the
/// substitutions for the pushed images. The first failed image aborts the
/// run; the registry is stopped either way.
pub async fn push_airgap_images<F>(
    registry: &mut TempRegistry,
    opts: &AirgapPushOptions,
    sink: &dyn ProgressSink,
    make_pipeline: F,
) -> Result<Vec<RewrittenImage>>
where
    F: FnOnce(&str) -> CopyPipeline,
{
    if registry.state() == RegistryState::Stopped {
        sink.line("Starting local registry");
        registry.start(&opts.root_dir).await?;
    }
    let running = RunningRegistry(registry);

    let endpoint = running.0.endpoint()?;
    let pipeline = make_pipeline(&endpoint);
    let dest_credentials = opts.dest.credentials();

    let mut report = ProgressReport::new(opts.images.iter().cloned());
    sink.report(&report);

    let mut substitutions: Vec<RewrittenImage> = Vec::new();
    for image in &opts.images {
        let rewritten = rewrite(image, &opts.dest)?;
        let src = running.0.src_ref(image)?;
        let dest = rewritten.destination();

        match running.0.get_image_layers(image).await {
            Ok(layers) => report.set_total(image, layers.len() as u64),
            Err(e) => tracing::debug!(image = %image, error = %e, "Could not count layers"),
        }

        sink.line(&format!("Pushing {} to {}", image, dest));
        report.set_status(image, ImageStatus::Running, None);
        sink.report(&report);

        let push = PushImageOptions::new(src, dest.clone())
            .with_dest_credentials(dest_credentials.clone());
        if let Err(e) = pipeline.push_image(&push).await {
            sink.line(&format!("Failed to push {}: {}", image, e));
            report.set_status(image, ImageStatus::Failed, Some(e.to_string()));
            sink.report(&report);
            return Err(e);
        }

        report.set_status(image, ImageStatus::Completed, None);
        sink.report(&report);
        tracing::info!(image = %image, dest = %dest, "Air-gap image pushed");

        for alt in build_alt_names(&rewritten) {
            if !substitutions.contains(&alt) {
                substitutions.push(alt);
            }
        }
    }

    sink.line(&format!("Pushed {} image(s)", opts.images.len()));
    Ok(substitutions)
}
