//! Shared fixtures for integration tests
//!
//! `SplitRuntime` reads the mask straight from the red channel: the
//! preprocessor emits a `[1, 1, H, W]` tensor of red values and the model
//! returns it unchanged, optionally after a width-proportional delay.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use imgly_bgremove_client::{
    CapabilityProbe, Device, HostCapabilities, ModelLoadOptions, ModelRuntime, PipelineHooks,
    Preprocessor, ProcessorLoadOptions, ProgressInfo, RemovalError, Result, SegmentationModel,
    StaticProbe, TelemetryEvent, TelemetryKind,
};
use ndarray::Array4;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct RedPreprocessor {
    fail: bool,
}

#[async_trait]
impl Preprocessor for RedPreprocessor {
    async fn process(&self, image: &RgbaImage) -> Result<Array4<f32>> {
        if self.fail {
            return Err(RemovalError::inference("preprocessor exploded"));
        }
        let (width, height) = image.dimensions();
        Ok(Array4::from_shape_fn(
            (1, 1, height as usize, width as usize),
            |(_, _, y, x)| f32::from(image.get_pixel(x as u32, y as u32)[0]) / 255.0,
        ))
    }
}

struct PassThroughModel {
    per_column: Option<Duration>,
}

#[async_trait]
impl SegmentationModel for PassThroughModel {
    async fn infer(&self, pixel_values: Array4<f32>) -> Result<Array4<f32>> {
        if let Some(per_column) = self.per_column {
            let columns = pixel_values.shape()[3] as u32;
            tokio::time::sleep(per_column * columns).await;
        }
        Ok(pixel_values)
    }
}

/// Runtime whose masks equal the red channel of the input
#[derive(Default)]
pub struct SplitRuntime {
    pub failing_devices: Vec<Device>,
    pub fail_preprocess: bool,
    /// Inference delay per image column
    pub per_column: Option<Duration>,
    pub attempts: Mutex<Vec<(Device, String)>>,
}

impl SplitRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(devices: &[Device]) -> Self {
        Self {
            failing_devices: devices.to_vec(),
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> Vec<(Device, String)> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelRuntime for SplitRuntime {
    async fn load_model(
        &self,
        model_id: &str,
        options: ModelLoadOptions,
    ) -> Result<Arc<dyn SegmentationModel>> {
        self.attempts
            .lock()
            .unwrap()
            .push((options.device, model_id.to_string()));
        if self.failing_devices.contains(&options.device) {
            return Err(RemovalError::model_load(format!("{} unavailable", options.device)));
        }
        if let Some(progress) = &options.progress {
            progress(ProgressInfo::bytes(
                format!("{}/model.onnx", options.subfolder),
                1,
                2,
            ));
            progress(ProgressInfo::bytes(
                format!("{}/model.onnx", options.subfolder),
                2,
                2,
            ));
        }
        Ok(Arc::new(PassThroughModel {
            per_column: self.per_column,
        }))
    }

    async fn load_processor(
        &self,
        _model_id: &str,
        _options: ProcessorLoadOptions,
    ) -> Result<Arc<dyn Preprocessor>> {
        Ok(Arc::new(RedPreprocessor {
            fail: self.fail_preprocess,
        }))
    }
}

pub fn desktop_probe() -> Arc<dyn CapabilityProbe> {
    Arc::new(StaticProbe::new(HostCapabilities {
        has_gpu: true,
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64)".to_string(),
        mobile_hint: Some(false),
        device_memory_gb: Some(32.0),
        hardware_concurrency: Some(16),
    }))
}

pub fn phone_probe() -> Arc<dyn CapabilityProbe> {
    Arc::new(StaticProbe::new(HostCapabilities {
        has_gpu: false,
        user_agent: "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X)".to_string(),
        mobile_hint: Some(true),
        device_memory_gb: Some(4.0),
        hardware_concurrency: Some(6),
    }))
}

/// Left half red = 0, right half red = 255
pub fn half_split(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgba([0, 90, 200, 255])
        } else {
            Rgba([255, 90, 200, 255])
        }
    })
}

/// Records telemetry kinds in arrival order
#[derive(Default)]
pub struct TelemetryRecorder {
    pub kinds: Mutex<Vec<TelemetryKind>>,
}

impl TelemetryRecorder {
    pub fn kinds(&self) -> Vec<TelemetryKind> {
        self.kinds.lock().unwrap().clone()
    }
}

impl PipelineHooks for TelemetryRecorder {
    fn telemetry(&self, event: &TelemetryEvent) {
        self.kinds.lock().unwrap().push(event.kind);
    }
}
