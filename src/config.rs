//! Client configuration: partial user input, presets and the resolved form
//!
//! Resolution layers built-in defaults, then the named preset, then the
//! explicit user fields. Nested sections merge field by field, candidate
//! lists replace wholesale and absent fields never overwrite a prior value.

use crate::{
    error::{RemovalError, Result},
    telemetry::PipelineHooks,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

pub const DEFAULT_MODEL_ID: &str = "briaai/RMBG-1.4";
pub const DEFAULT_MODEL_REVISION: &str = "main";
pub const DEFAULT_MODEL_LOCAL_PATH: &str = "/local-models/";
pub const DEFAULT_REMOTE_HOST: &str = "https://huggingface.co";
pub const DEFAULT_REMOTE_PATH_TEMPLATE: &str = "/{model}/resolve/{revision}/";
pub const DEFAULT_MOBILE_MAX_INFERENCE_PIXELS: u64 = 1024 * 1024;
pub const DEFAULT_DESKTOP_MAX_INFERENCE_PIXELS: u64 = 1920 * 1080;
pub const DEFAULT_ALPHA_APPLY_CHUNK_ROWS: u32 = 256;

/// Execution device requested from the model runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Device {
    /// GPU-accelerated execution
    #[serde(rename = "webgpu")]
    WebGpu,
    /// CPU execution
    #[serde(rename = "wasm")]
    Wasm,
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WebGpu => write!(f, "webgpu"),
            Self::Wasm => write!(f, "wasm"),
        }
    }
}

/// Numeric precision of the model weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Fp32,
    Fp16,
    Q8,
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fp32 => write!(f, "fp32"),
            Self::Fp16 => write!(f, "fp16"),
            Self::Q8 => write!(f, "q8"),
        }
    }
}

/// How model candidates are chosen when no explicit list is given
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModelStrategy {
    /// Pick by device profile, with a fallback
    #[default]
    #[serde(rename = "auto")]
    Auto,
    /// Always GPU with half precision
    #[serde(rename = "webgpu-fp16")]
    HighQuality,
    /// Always CPU with quantized weights
    #[serde(rename = "wasm-q8")]
    Efficient,
}

/// Named bundle of defaults layered between built-ins and user fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientPreset {
    #[serde(rename = "fast-mobile")]
    FastMobile,
    #[serde(rename = "quality-desktop")]
    QualityDesktop,
}

impl ClientPreset {
    /// Partial configuration contributed by this preset
    #[must_use]
    pub fn overrides(self) -> ClientConfig {
        match self {
            Self::FastMobile => ClientConfig {
                model: Some(ModelConfig {
                    strategy: Some(ModelStrategy::Efficient),
                    ..ModelConfig::default()
                }),
                performance: Some(PerformanceConfig {
                    mobile_max_inference_pixels: Some(768 * 768),
                    desktop_max_inference_pixels: Some(1280 * 720),
                    alpha_apply_chunk_rows: Some(128),
                }),
                ..ClientConfig::default()
            },
            Self::QualityDesktop => ClientConfig {
                model: Some(ModelConfig {
                    strategy: Some(ModelStrategy::HighQuality),
                    ..ModelConfig::default()
                }),
                performance: Some(PerformanceConfig {
                    mobile_max_inference_pixels: Some(DEFAULT_MOBILE_MAX_INFERENCE_PIXELS),
                    desktop_max_inference_pixels: Some(2560 * 1440),
                    alpha_apply_chunk_rows: Some(384),
                }),
                ..ClientConfig::default()
            },
        }
    }
}

/// One (model, device, precision) combination to attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCandidate {
    pub model_id: String,
    pub device: Device,
    #[serde(rename = "dtype")]
    pub precision: Precision,
    /// Human-readable name reported after a successful load
    pub label: String,
}

impl ModelCandidate {
    pub fn new<S: Into<String>, L: Into<String>>(
        model_id: S,
        device: Device,
        precision: Precision,
        label: L,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            device,
            precision,
            label: label.into(),
        }
    }
}

/// Partial model section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ModelStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<ModelCandidate>>,
}

/// Partial runtime section, handed to [`crate::inference::ModelRuntime::configure`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_browser_cache: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_local_models: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_remote_models: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_model_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_path_template: Option<String>,
}

/// Partial performance section
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile_max_inference_pixels: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desktop_max_inference_pixels: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpha_apply_chunk_rows: Option<u32>,
}

/// User-facing configuration; every field is optional
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<ClientPreset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance: Option<PerformanceConfig>,
    #[serde(skip)]
    pub hooks: Option<Arc<dyn PipelineHooks>>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("preset", &self.preset)
            .field("model", &self.model)
            .field("runtime", &self.runtime)
            .field("performance", &self.performance)
            .field("hooks", &self.hooks.is_some())
            .finish()
    }
}

impl ClientConfig {
    /// Parse a partial configuration document (camelCase keys)
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            RemovalError::invalid_config(format!("Failed to parse client configuration: {}", e))
        })
    }

    /// Read a partial configuration document from disk
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            RemovalError::invalid_config(format!(
                "Failed to read configuration file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&text)
    }

    #[must_use]
    pub fn with_preset(mut self, preset: ClientPreset) -> Self {
        self.preset = Some(preset);
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = Some(model);
        self
    }

    #[must_use]
    pub fn with_runtime(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = Some(runtime);
        self
    }

    #[must_use]
    pub fn with_performance(mut self, performance: PerformanceConfig) -> Self {
        self.performance = Some(performance);
        self
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn PipelineHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Resolve against defaults and the named preset
    #[must_use]
    pub fn resolve(&self) -> ResolvedConfig {
        resolve(Some(self))
    }
}

/// Right-biased merge of partial sections
trait Merge {
    fn merge(self, over: Self) -> Self;
}

impl<T: Merge> Merge for Option<T> {
    fn merge(self, over: Self) -> Self {
        match (self, over) {
            (Some(base), Some(over)) => Some(base.merge(over)),
            (base, None) => base,
            (None, over) => over,
        }
    }
}

impl Merge for ModelConfig {
    fn merge(self, over: Self) -> Self {
        Self {
            model_id: over.model_id.or(self.model_id),
            revision: over.revision.or(self.revision),
            strategy: over.strategy.or(self.strategy),
            // lists replace, never concatenate
            candidates: over.candidates.or(self.candidates),
        }
    }
}

impl Merge for RuntimeConfig {
    fn merge(self, over: Self) -> Self {
        Self {
            use_browser_cache: over.use_browser_cache.or(self.use_browser_cache),
            allow_local_models: over.allow_local_models.or(self.allow_local_models),
            allow_remote_models: over.allow_remote_models.or(self.allow_remote_models),
            local_model_path: over.local_model_path.or(self.local_model_path),
            remote_host: over.remote_host.or(self.remote_host),
            remote_path_template: over.remote_path_template.or(self.remote_path_template),
        }
    }
}

impl Merge for PerformanceConfig {
    fn merge(self, over: Self) -> Self {
        Self {
            mobile_max_inference_pixels: over
                .mobile_max_inference_pixels
                .or(self.mobile_max_inference_pixels),
            desktop_max_inference_pixels: over
                .desktop_max_inference_pixels
                .or(self.desktop_max_inference_pixels),
            alpha_apply_chunk_rows: over.alpha_apply_chunk_rows.or(self.alpha_apply_chunk_rows),
        }
    }
}

/// Resolved model section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSettings {
    pub model_id: String,
    pub revision: String,
    pub strategy: ModelStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<ModelCandidate>>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            revision: DEFAULT_MODEL_REVISION.to_string(),
            strategy: ModelStrategy::Auto,
            candidates: None,
        }
    }
}

impl ModelSettings {
    fn apply(self, partial: ModelConfig) -> Self {
        Self {
            model_id: partial.model_id.unwrap_or(self.model_id),
            revision: partial.revision.unwrap_or(self.revision),
            strategy: partial.strategy.unwrap_or(self.strategy),
            candidates: partial.candidates.or(self.candidates),
        }
    }
}

/// Resolved runtime section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSettings {
    pub use_browser_cache: bool,
    pub allow_local_models: bool,
    pub allow_remote_models: bool,
    pub local_model_path: String,
    pub remote_host: String,
    pub remote_path_template: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            use_browser_cache: true,
            allow_local_models: false,
            allow_remote_models: true,
            local_model_path: DEFAULT_MODEL_LOCAL_PATH.to_string(),
            remote_host: DEFAULT_REMOTE_HOST.to_string(),
            remote_path_template: DEFAULT_REMOTE_PATH_TEMPLATE.to_string(),
        }
    }
}

impl RuntimeSettings {
    fn apply(self, partial: RuntimeConfig) -> Self {
        Self {
            use_browser_cache: partial.use_browser_cache.unwrap_or(self.use_browser_cache),
            allow_local_models: partial.allow_local_models.unwrap_or(self.allow_local_models),
            allow_remote_models: partial
                .allow_remote_models
                .unwrap_or(self.allow_remote_models),
            local_model_path: partial.local_model_path.unwrap_or(self.local_model_path),
            remote_host: partial.remote_host.unwrap_or(self.remote_host),
            remote_path_template: partial
                .remote_path_template
                .unwrap_or(self.remote_path_template),
        }
    }

    /// Base URL of a model's files on the remote host
    #[must_use]
    pub fn model_base_url(&self, model_id: &str, revision: &str) -> String {
        let path = self
            .remote_path_template
            .replace("{model}", model_id)
            .replace("{revision}", revision);
        format!("{}{}", self.remote_host.trim_end_matches('/'), path)
    }
}

/// Resolved performance section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSettings {
    pub mobile_max_inference_pixels: u64,
    pub desktop_max_inference_pixels: u64,
    pub alpha_apply_chunk_rows: u32,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            mobile_max_inference_pixels: DEFAULT_MOBILE_MAX_INFERENCE_PIXELS,
            desktop_max_inference_pixels: DEFAULT_DESKTOP_MAX_INFERENCE_PIXELS,
            alpha_apply_chunk_rows: DEFAULT_ALPHA_APPLY_CHUNK_ROWS,
        }
    }
}

impl PerformanceSettings {
    fn apply(self, partial: PerformanceConfig) -> Self {
        Self {
            mobile_max_inference_pixels: partial
                .mobile_max_inference_pixels
                .unwrap_or(self.mobile_max_inference_pixels),
            desktop_max_inference_pixels: partial
                .desktop_max_inference_pixels
                .unwrap_or(self.desktop_max_inference_pixels),
            alpha_apply_chunk_rows: partial
                .alpha_apply_chunk_rows
                .unwrap_or(self.alpha_apply_chunk_rows),
        }
    }
}

/// Fully resolved configuration; immutable once built
#[derive(Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<ClientPreset>,
    pub model: ModelSettings,
    pub runtime: RuntimeSettings,
    pub performance: PerformanceSettings,
    #[serde(skip)]
    pub hooks: Option<Arc<dyn PipelineHooks>>,
}

impl std::fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("preset", &self.preset)
            .field("model", &self.model)
            .field("runtime", &self.runtime)
            .field("performance", &self.performance)
            .field("hooks", &self.hooks.is_some())
            .finish()
    }
}

impl ResolvedConfig {
    /// Stable string identity of this configuration
    ///
    /// Hooks are not part of the signature.
    #[must_use]
    pub fn signature(&self) -> String {
        match serde_json::to_value(self) {
            Ok(value) => sort_keys(value).to_string(),
            // Every field serializes to plain JSON
            Err(e) => {
                log::warn!("Failed to serialize resolved configuration: {}", e);
                String::new()
            },
        }
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.performance.mobile_max_inference_pixels == 0 {
            return Err(RemovalError::config_value_error(
                "mobileMaxInferencePixels",
                0,
                ">= 1",
            ));
        }
        if self.performance.desktop_max_inference_pixels == 0 {
            return Err(RemovalError::config_value_error(
                "desktopMaxInferencePixels",
                0,
                ">= 1",
            ));
        }
        if self.performance.alpha_apply_chunk_rows == 0 {
            return Err(RemovalError::config_value_error(
                "alphaApplyChunkRows",
                0,
                ">= 1",
            ));
        }
        if self.model.model_id.trim().is_empty() {
            return Err(RemovalError::invalid_config("modelId must not be empty"));
        }
        if let Some(candidates) = &self.model.candidates {
            if let Some(candidate) = candidates.iter().find(|c| c.model_id.trim().is_empty()) {
                return Err(RemovalError::invalid_config(format!(
                    "Candidate '{}' has an empty modelId",
                    candidate.label
                )));
            }
        }
        Ok(())
    }

    /// Pixel budget for the given device class
    #[must_use]
    pub fn max_inference_pixels(&self, is_mobile_or_weak: bool) -> u64 {
        if is_mobile_or_weak {
            self.performance.mobile_max_inference_pixels
        } else {
            self.performance.desktop_max_inference_pixels
        }
    }
}

/// Resolve a partial configuration: defaults, then preset, then user fields
#[must_use]
pub fn resolve(user: Option<&ClientConfig>) -> ResolvedConfig {
    let Some(user) = user else {
        return ResolvedConfig::default();
    };

    let preset = user.preset.map(ClientPreset::overrides).unwrap_or_default();

    let model = preset.model.merge(user.model.clone());
    let runtime = preset.runtime.merge(user.runtime.clone());
    let performance = preset.performance.merge(user.performance);

    ResolvedConfig {
        preset: user.preset,
        model: ModelSettings::default().apply(model.unwrap_or_default()),
        runtime: RuntimeSettings::default().apply(runtime.unwrap_or_default()),
        performance: PerformanceSettings::default().apply(performance.unwrap_or_default()),
        hooks: user.hooks.clone(),
    }
}

/// Signature of a partial configuration after resolution
#[must_use]
pub fn config_signature(user: Option<&ClientConfig>) -> String {
    resolve(user).signature()
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key, sort_keys(value));
            }
            Value::Object(sorted)
        },
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
