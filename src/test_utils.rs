//! Mock model runtime for unit tests
//!
//! The mock preprocessor scales RGB into `[1, 3, H, W]` and the mock model
//! returns the red plane as the mask, so a test controls the alpha channel
//! through the red channel of its input.

use crate::{
    config::{Device, RuntimeSettings},
    error::{RemovalError, Result},
    inference::{
        ModelLoadOptions, ModelRuntime, Preprocessor, ProcessorLoadOptions, ProgressInfo,
        SegmentationModel,
    },
};
use async_trait::async_trait;
use image::RgbaImage;
use ndarray::{s, Array4};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How the mock runtime answers load requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeBehavior {
    Succeed,
    /// Fail model loads for one device
    FailDevice(Device),
    FailAll,
    /// Load fine, but the preprocessor fails every call
    FailPreprocess,
}

#[derive(Debug)]
pub struct MockPreprocessor {
    fail: bool,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Preprocessor for MockPreprocessor {
    async fn process(&self, image: &RgbaImage) -> Result<Array4<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(RemovalError::inference("bad processor"));
        }
        let (width, height) = image.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
        for (x, y, pixel) in image.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = f32::from(pixel[c]) / 255.0;
            }
        }
        Ok(tensor)
    }
}

#[derive(Debug)]
pub struct MockModel {
    delay: Option<Duration>,
}

#[async_trait]
impl SegmentationModel for MockModel {
    async fn infer(&self, pixel_values: Array4<f32>) -> Result<Array4<f32>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let red = pixel_values.slice(s![.., 0..1, .., ..]).to_owned();
        Ok(red)
    }
}

/// Scriptable runtime recording every load attempt
#[derive(Debug)]
pub struct MockRuntime {
    behavior: RuntimeBehavior,
    delay: Option<Duration>,
    attempts: Mutex<Vec<Device>>,
    configured: Mutex<Option<RuntimeSettings>>,
    preprocess_calls: Arc<AtomicUsize>,
}

impl MockRuntime {
    #[must_use]
    pub fn new(behavior: RuntimeBehavior) -> Self {
        Self {
            behavior,
            delay: None,
            attempts: Mutex::new(Vec::new()),
            configured: Mutex::new(None),
            preprocess_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Delay applied to every model load and inference
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn model_attempts(&self) -> Vec<Device> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn configured(&self) -> Option<RuntimeSettings> {
        self.configured.lock().unwrap().clone()
    }

    pub fn preprocess_calls(&self) -> usize {
        self.preprocess_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelRuntime for MockRuntime {
    fn configure(&self, settings: &RuntimeSettings) {
        *self.configured.lock().unwrap() = Some(settings.clone());
    }

    async fn load_model(
        &self,
        _model_id: &str,
        options: ModelLoadOptions,
    ) -> Result<Arc<dyn SegmentationModel>> {
        self.attempts.lock().unwrap().push(options.device);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let fails = match self.behavior {
            RuntimeBehavior::FailAll => true,
            RuntimeBehavior::FailDevice(device) => device == options.device,
            RuntimeBehavior::Succeed | RuntimeBehavior::FailPreprocess => false,
        };
        if fails {
            return Err(RemovalError::inference(format!(
                "no weights for {}/{}",
                options.device, options.precision
            )));
        }

        if let Some(progress) = &options.progress {
            progress(ProgressInfo::status("initiate"));
            progress(ProgressInfo::bytes("onnx/model.onnx", 50, 100));
            progress(ProgressInfo::bytes("onnx/model.onnx", 100, 100));
            progress(ProgressInfo::status("done"));
        }
        Ok(Arc::new(MockModel { delay: self.delay }))
    }

    async fn load_processor(
        &self,
        _model_id: &str,
        options: ProcessorLoadOptions,
    ) -> Result<Arc<dyn Preprocessor>> {
        if let Some(progress) = &options.progress {
            progress(ProgressInfo::bytes("preprocessor_config.json", 100, 100));
        }
        Ok(Arc::new(MockPreprocessor {
            fail: self.behavior == RuntimeBehavior::FailPreprocess,
            calls: Arc::clone(&self.preprocess_calls),
        }))
    }
}

/// Image whose red channel ramps left to right
#[must_use]
pub fn gradient_image(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, _| {
        let red = if width > 1 {
            (x * 255 / (width - 1)) as u8
        } else {
            255
        };
        image::Rgba([red, 10, 20, 255])
    })
}
