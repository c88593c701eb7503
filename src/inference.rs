//! Model runtime abstraction
//!
//! The forward pass, tensor math and weight delivery live outside this crate.
//! A host plugs them in by implementing [`ModelRuntime`], which hands out a
//! [`SegmentationModel`] and its matching [`Preprocessor`] for one candidate.

use crate::{
    config::{Device, Precision, RuntimeSettings},
    error::Result,
};
use async_trait::async_trait;
use image::RgbaImage;
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Callback receiving progress events
pub type ProgressCallback = Arc<dyn Fn(ProgressInfo) + Send + Sync>;

/// Status value of events carrying byte progress
pub const PROGRESS_STATUS: &str = "progress";

/// One progress event emitted while model files are fetched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressInfo {
    /// Event status (`initiate`, `download`, `progress`, `done`, ...)
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Percentage 0-100; per file from the runtime, aggregated when re-emitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loaded: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

impl ProgressInfo {
    /// Progress event for a file with byte counts
    #[must_use]
    pub fn bytes<S: Into<String>>(file: S, loaded: u64, total: u64) -> Self {
        Self {
            status: PROGRESS_STATUS.to_string(),
            file: Some(file.into()),
            progress: None,
            loaded: Some(loaded),
            total: Some(total),
        }
    }

    /// Non-progress status event (`initiate`, `done`, ...)
    #[must_use]
    pub fn status<S: Into<String>>(status: S) -> Self {
        Self {
            status: status.into(),
            ..Self::default()
        }
    }
}

/// Options for loading the segmentation model of one candidate
#[derive(Clone)]
pub struct ModelLoadOptions {
    pub device: Device,
    pub precision: Precision,
    pub revision: String,
    /// Repository subfolder holding the model weights
    pub subfolder: String,
    pub progress: Option<ProgressCallback>,
}

/// Options for loading the preprocessor of one candidate
#[derive(Clone)]
pub struct ProcessorLoadOptions {
    pub revision: String,
    pub progress: Option<ProgressCallback>,
}

/// Preprocessor turning an RGBA raster into the model's input tensor
#[async_trait]
pub trait Preprocessor: Send + Sync {
    /// Produce `pixel_values` (NCHW) for the model
    async fn process(&self, image: &RgbaImage) -> Result<Array4<f32>>;
}

/// Segmentation network producing a single-channel confidence map
#[async_trait]
pub trait SegmentationModel: Send + Sync {
    /// Run inference; the output is `[1, 1, H, W]` or any shape with two leading unit axes
    async fn infer(&self, pixel_values: Array4<f32>) -> Result<Array4<f32>>;
}

/// Factory for model and preprocessor handles
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    /// Apply cache and model-location settings before any load
    fn configure(&self, _settings: &RuntimeSettings) {}

    /// Load the model for one candidate
    async fn load_model(
        &self,
        model_id: &str,
        options: ModelLoadOptions,
    ) -> Result<Arc<dyn SegmentationModel>>;

    /// Load the preprocessor matching a model
    async fn load_processor(
        &self,
        model_id: &str,
        options: ProcessorLoadOptions,
    ) -> Result<Arc<dyn Preprocessor>>;
}
