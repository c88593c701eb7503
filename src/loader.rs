//! Candidate selection and ordered model loading with progress aggregation

use crate::{
    config::{Device, ModelCandidate, ModelSettings, ModelStrategy, Precision, ResolvedConfig},
    device::DeviceProfile,
    error::{RemovalError, Result},
    inference::{
        ModelLoadOptions, ModelRuntime, Preprocessor, ProcessorLoadOptions, ProgressCallback,
        ProgressInfo, SegmentationModel, PROGRESS_STATUS,
    },
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

/// Subfolder holding model weights in a model repository
pub const MODEL_SUBFOLDER: &str = "onnx";

/// A model and its preprocessor, ready for inference
#[derive(Clone)]
pub struct LoadedBundle {
    pub model: Arc<dyn SegmentationModel>,
    pub processor: Arc<dyn Preprocessor>,
    /// Label of the candidate that loaded
    pub label: String,
}

impl std::fmt::Debug for LoadedBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedBundle")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Ordered candidate list for the resolved model section and device
#[must_use]
pub fn select_candidates(model: &ModelSettings, profile: &DeviceProfile) -> Vec<ModelCandidate> {
    if let Some(candidates) = model.candidates.as_ref().filter(|c| !c.is_empty()) {
        return candidates.clone();
    }

    let id = model.model_id.as_str();
    let gpu = |label: &str| ModelCandidate::new(id, Device::WebGpu, Precision::Fp16, label);
    let cpu = |label: &str| ModelCandidate::new(id, Device::Wasm, Precision::Q8, label);

    match model.strategy {
        ModelStrategy::HighQuality => vec![gpu("Forced WebGPU fp16")],
        ModelStrategy::Efficient => vec![cpu("Forced WASM q8")],
        ModelStrategy::Auto if !profile.is_mobile_or_weak() => vec![
            gpu("WebGPU fp16 (desktop default)"),
            cpu("WASM q8 (desktop fallback)"),
        ],
        ModelStrategy::Auto if profile.has_acceleration => vec![
            gpu("WebGPU fp16 (mobile/weak default)"),
            cpu("WASM q8 (mobile/weak fallback)"),
        ],
        ModelStrategy::Auto => vec![cpu("WASM q8 (mobile/weak default)")],
    }
}

/// Folds per-file progress events into one aggregate percentage
///
/// Files are tracked across every attempted candidate, so the mean can drop
/// when a new file starts reporting.
pub struct ProgressAggregator {
    by_file: Mutex<HashMap<String, f64>>,
    sink: ProgressCallback,
}

impl ProgressAggregator {
    #[must_use]
    pub fn new(sink: ProgressCallback) -> Self {
        Self {
            by_file: Mutex::new(HashMap::new()),
            sink,
        }
    }

    /// Record one runtime event and forward the aggregate
    pub fn record(&self, info: &ProgressInfo) {
        if info.status != PROGRESS_STATUS {
            return;
        }

        let aggregate = {
            let mut by_file = match self.by_file.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(file) = &info.file {
                by_file.insert(file.clone(), file_percentage(info));
            }
            if by_file.is_empty() {
                0.0
            } else {
                by_file.values().sum::<f64>() / by_file.len() as f64
            }
        };

        (self.sink)(ProgressInfo {
            status: info.status.clone(),
            file: info.file.clone(),
            progress: Some(aggregate),
            loaded: info.loaded,
            total: info.total,
        });
    }

    /// Callback handed to the runtime
    #[must_use]
    pub fn callback(self: &Arc<Self>) -> ProgressCallback {
        let aggregator = Arc::clone(self);
        Arc::new(move |info: ProgressInfo| aggregator.record(&info))
    }
}

fn file_percentage(info: &ProgressInfo) -> f64 {
    let point = info.progress.unwrap_or_else(|| match (info.loaded, info.total) {
        (Some(loaded), Some(total)) if total > 0 => loaded as f64 / total as f64 * 100.0,
        _ => 0.0,
    });
    point.clamp(0.0, 100.0)
}

/// Attempt candidates in order until one loads both model and processor
#[instrument(skip(runtime, config, on_progress), fields(model_id = %config.model.model_id))]
pub async fn load_model_bundle(
    runtime: &dyn ModelRuntime,
    config: &ResolvedConfig,
    profile: &DeviceProfile,
    on_progress: Option<ProgressCallback>,
) -> Result<LoadedBundle> {
    let candidates = select_candidates(&config.model, profile);
    let progress = on_progress.map(|sink| Arc::new(ProgressAggregator::new(sink)).callback());
    let revision = config.model.revision.clone();
    let mut last_error: Option<RemovalError> = None;

    for candidate in candidates {
        debug!(
            label = %candidate.label,
            device = %candidate.device,
            precision = %candidate.precision,
            "Attempting model candidate"
        );

        let model_options = ModelLoadOptions {
            device: candidate.device,
            precision: candidate.precision,
            revision: revision.clone(),
            subfolder: MODEL_SUBFOLDER.to_string(),
            progress: progress.clone(),
        };
        let processor_options = ProcessorLoadOptions {
            revision: revision.clone(),
            progress: progress.clone(),
        };

        let (model, processor) = futures::join!(
            runtime.load_model(&candidate.model_id, model_options),
            runtime.load_processor(&candidate.model_id, processor_options)
        );

        match (model, processor) {
            (Ok(model), Ok(processor)) => {
                info!(label = %candidate.label, "Model bundle loaded");
                return Ok(LoadedBundle {
                    model,
                    processor,
                    label: candidate.label,
                });
            },
            (Err(e), _) | (Ok(_), Err(e)) => {
                warn!(label = %candidate.label, error = %e, "Model candidate failed");
                last_error = Some(e);
            },
        }
    }

    Err(RemovalError::model_load(match last_error {
        Some(e) => format!("Failed to load model bundle: {}", e.message()),
        None => "Failed to load model bundle".to_string(),
    }))
}
