//! Error types for background removal orchestration

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, RemovalError>;

/// Error classifications surfaced by the client
///
/// Every variant carries only a message. Underlying errors are flattened into
/// that message when they cross a classification boundary, which also keeps
/// the type `Clone` so one in-flight load result can be handed to every
/// caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemovalError {
    /// Every model candidate failed to load
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// Input could not be read or decoded
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    /// Failure anywhere from preprocessing through compositing
    #[error("Inference error: {0}")]
    Inference(String),

    /// Worker responded with a failure or with an incomplete payload
    #[error("Worker protocol error: {0}")]
    Protocol(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RemovalError {
    /// Create a new model load error
    pub fn model_load<S: Into<String>>(msg: S) -> Self {
        Self::ModelLoad(msg.into())
    }

    /// Create a new unsupported input error
    pub fn unsupported_input<S: Into<String>>(msg: S) -> Self {
        Self::UnsupportedInput(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
    ) -> Self {
        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {})",
            parameter, value, valid_range
        ))
    }

    /// The message without the classification prefix
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::ModelLoad(msg)
            | Self::UnsupportedInput(msg)
            | Self::Inference(msg)
            | Self::Protocol(msg)
            | Self::InvalidConfig(msg)
            | Self::Internal(msg) => msg,
        }
    }

    /// Stable classification name, as reported to telemetry and across the worker boundary
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ModelLoad(_) => "ModelLoadError",
            Self::UnsupportedInput(_) => "UnsupportedInputError",
            Self::Inference(_) => "InferenceError",
            Self::Protocol(_) => "ProtocolError",
            Self::InvalidConfig(_) => "InvalidConfigError",
            Self::Internal(_) => "InternalError",
        }
    }
}
