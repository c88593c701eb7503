#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]
#![allow(clippy::module_name_repetitions)]

//! # IMG.LY Background Removal Client
//!
//! Orchestration around an image-segmentation model: picks a device-aware
//! model candidate and falls back across candidates, aggregates multi-file
//! download progress, scales images to an inference budget, and writes the
//! predicted mask into the alpha channel without blocking the calling task
//! for long stretches. Work can run on the calling task or on a background
//! worker thread behind a correlated request/response protocol.
//!
//! The forward pass itself is provided by the caller through the
//! [`ModelRuntime`], [`SegmentationModel`] and [`Preprocessor`] traits.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use imgly_bgremove_client::{
//!     Background, Client, ClientConfig, ClientPreset, LoadOptions, ModelRuntime,
//!     RemovalClient, RemovalInput, RemoveOptions,
//! };
//! use std::sync::Arc;
//!
//! # async fn example(runtime: Arc<dyn ModelRuntime>) -> anyhow::Result<()> {
//! let config = ClientConfig::default().with_preset(ClientPreset::QualityDesktop);
//! let client = Client::new(Some(config), runtime)?;
//!
//! client.load(LoadOptions::default()).await?;
//! let result = client
//!     .remove(
//!         RemovalInput::from("photo.jpg"),
//!         RemoveOptions::default().with_background(Background::parse("#ffffff")?),
//!     )
//!     .await?;
//! result.save_png("photo-matted.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Background worker
//!
//! ```rust,no_run
//! use imgly_bgremove_client::{
//!     create_worker_client, BackgroundWorker, Client, ExecutionMode, ModelRuntime,
//!     RemovalInput, RemoveOptions, WorkerClientOptions,
//! };
//! use std::sync::Arc;
//!
//! # async fn example(runtime: Arc<dyn ModelRuntime>) -> anyhow::Result<()> {
//! let builder = Client::builder().runtime(runtime);
//! let client = create_worker_client(WorkerClientOptions {
//!     builder: builder.clone(),
//!     mode: ExecutionMode::Auto,
//!     worker_factory: Some(BackgroundWorker::factory(builder)),
//! })?;
//!
//! let result = client
//!     .remove(RemovalInput::from("photo.jpg"), RemoveOptions::default())
//!     .await?;
//! println!("{}x{}", result.width, result.height);
//! client.dispose();
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `webp-support` (default): WebP decoding and encoding
//! - `tracing-init`: [`tracing_config::TracingConfig`] subscriber setup
//! - `tracing-json`: JSON output for the subscriber

pub mod batch;
pub mod client;
pub mod compositor;
pub mod config;
pub mod device;
pub mod error;
pub mod facade;
pub mod inference;
pub mod input;
pub mod loader;
pub mod pipeline;
pub mod telemetry;
#[cfg(feature = "tracing-init")]
pub mod tracing_config;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_utils;

pub use batch::run_ordered;
pub use client::{Client, ClientBuilder, RemovalClient};
pub use compositor::{apply_alpha_chunked, mask_from_tensor, PixelSurface, RgbaSurface};
pub use config::{
    config_signature, resolve, ClientConfig, ClientPreset, Device, ModelCandidate, ModelConfig,
    ModelStrategy, PerformanceConfig, Precision, ResolvedConfig, RuntimeConfig,
};
pub use device::{detect, CapabilityProbe, DeviceProfile, HostCapabilities, StaticProbe, SystemProbe};
pub use error::{RemovalError, Result};
pub use facade::DefaultClient;
pub use inference::{
    ModelLoadOptions, ModelRuntime, Preprocessor, ProcessorLoadOptions, ProgressCallback,
    ProgressInfo, SegmentationModel,
};
pub use input::{
    CanvasElement, DefaultNormalizer, HttpFetcher, ImageElement, ImageFetcher, InputNormalizer,
    NormalizedInput, ReleaseGuard, RemovalInput, TransferableInput,
};
pub use loader::{load_model_bundle, select_candidates, LoadedBundle, ProgressAggregator};
pub use pipeline::{remove_background_with_model, sizing::compute_inference_size};
pub use telemetry::{PipelineHooks, TelemetryEvent, TelemetryKind};
pub use types::{
    Background, BatchOptions, Bitmap, Blob, LoadOptions, OutputFormat, OutputOptions,
    RemovalResult, RemoveOptions,
};
pub use worker::{
    create_worker_client, BackgroundWorker, ExecutionMode, WorkerClient, WorkerClientOptions,
    WorkerFactory, WorkerRequest, WorkerResponse, WorkerRuntime, WorkerTransport,
};

#[cfg(feature = "tracing-init")]
pub use tracing_config::{TracingConfig, TracingFormat};
