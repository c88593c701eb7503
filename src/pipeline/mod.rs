//! Single-image removal pipeline
//!
//! before-hook → normalize → size → preprocess → infer → mask → composite →
//! background → after-hook. Normalization errors surface unchanged; anything
//! later is reported as an inference failure. The normalized input is
//! released exactly once on every path.

pub mod sizing;

pub use sizing::compute_inference_size;

use crate::{
    compositor::{
        apply_alpha_chunked, mask_from_tensor, render_with_background, resize_image,
        resize_mask, RgbaSurface,
    },
    config::ResolvedConfig,
    device::{detect, CapabilityProbe},
    error::{RemovalError, Result},
    input::{InputNormalizer, NormalizedInput, RemovalInput},
    loader::LoadedBundle,
    telemetry::PipelineHooks,
    types::{Background, RemovalResult, RemoveOptions},
};
use image::RgbaImage;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Prefix of every error raised after normalization
pub const REMOVAL_FAILED: &str = "Background removal failed";

/// Run one input through a loaded model bundle
#[instrument(skip_all, fields(input = input.kind()))]
pub async fn remove_background_with_model(
    bundle: &LoadedBundle,
    config: &ResolvedConfig,
    probe: &dyn CapabilityProbe,
    normalizer: &dyn InputNormalizer,
    input: RemovalInput,
    options: &RemoveOptions,
) -> Result<RemovalResult> {
    let hooks = config.hooks.as_ref();
    let processed = match hooks {
        Some(hooks) => hooks.before_process(input, options).await,
        None => input,
    };
    // the after-hook sees the input as the before-hook left it
    let hook_input = hooks.map(|_| processed.clone());

    let NormalizedInput { image, mut release } = normalizer.normalize(processed).await?;

    let outcome = run_stages(
        bundle,
        config,
        probe,
        image,
        options,
        hooks.zip(hook_input.as_ref()),
    )
    .await;
    release.release();

    outcome.map_err(|e| RemovalError::inference(format!("{}: {}", REMOVAL_FAILED, e.message())))
}

async fn run_stages(
    bundle: &LoadedBundle,
    config: &ResolvedConfig,
    probe: &dyn CapabilityProbe,
    image: RgbaImage,
    options: &RemoveOptions,
    after: Option<(&Arc<dyn PipelineHooks>, &RemovalInput)>,
) -> Result<RemovalResult> {
    let profile = detect(probe);
    let (width, height) = image.dimensions();
    let (inference_width, inference_height) = compute_inference_size(
        width,
        height,
        config.performance.mobile_max_inference_pixels,
        config.performance.desktop_max_inference_pixels,
        profile.is_mobile_or_weak(),
    );
    debug!(
        width,
        height,
        inference_width,
        inference_height,
        mobile_or_weak = profile.is_mobile_or_weak(),
        "Sized inference input"
    );

    let pixel_values = if (inference_width, inference_height) == (width, height) {
        bundle.processor.process(&image).await?
    } else {
        let scaled = resize_image(&image, inference_width, inference_height);
        bundle.processor.process(&scaled).await?
    };

    let output = bundle.model.infer(pixel_values).await?;
    let mask = resize_mask(&mask_from_tensor(&output)?, width, height);

    let mut canvas = image;
    apply_alpha_chunked(
        &mut RgbaSurface::new(&mut canvas),
        &mask,
        config.performance.alpha_apply_chunk_rows,
    )
    .await?;

    let final_image = match options.background {
        Background::Transparent => canvas,
        Background::Color(color) => render_with_background(&canvas, color),
    };
    let result = RemovalResult::new(final_image);

    if let Some((hooks, input)) = after {
        hooks.after_process(&result, input, options).await;
    }
    Ok(result)
}
