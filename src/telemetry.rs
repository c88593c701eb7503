//! Telemetry events and pipeline hooks

use crate::{
    error::Result,
    input::RemovalInput,
    types::{RemovalResult, RemoveOptions},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use instant::Instant;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

/// Kind of telemetry signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TelemetryKind {
    #[serde(rename = "load:start")]
    LoadStart,
    #[serde(rename = "load:success")]
    LoadSuccess,
    #[serde(rename = "load:error")]
    LoadError,
    #[serde(rename = "remove:start")]
    RemoveStart,
    #[serde(rename = "remove:success")]
    RemoveSuccess,
    #[serde(rename = "remove:error")]
    RemoveError,
    #[serde(rename = "removeMany:start")]
    RemoveManyStart,
    #[serde(rename = "removeMany:success")]
    RemoveManySuccess,
    #[serde(rename = "removeMany:error")]
    RemoveManyError,
}

impl TelemetryKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoadStart => "load:start",
            Self::LoadSuccess => "load:success",
            Self::LoadError => "load:error",
            Self::RemoveStart => "remove:start",
            Self::RemoveSuccess => "remove:success",
            Self::RemoveError => "remove:error",
            Self::RemoveManyStart => "removeMany:start",
            Self::RemoveManySuccess => "removeMany:success",
            Self::RemoveManyError => "removeMany:error",
        }
    }

    #[must_use]
    pub fn is_start(&self) -> bool {
        matches!(
            self,
            Self::LoadStart | Self::RemoveStart | Self::RemoveManyStart
        )
    }
}

impl std::fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fire-and-forget observability signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    #[serde(rename = "type")]
    pub kind: TelemetryKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl TelemetryEvent {
    #[must_use]
    pub fn start(kind: TelemetryKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            duration_ms: None,
            detail: None,
        }
    }

    #[must_use]
    pub fn finished(kind: TelemetryKind, started_at: Instant, detail: Option<String>) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            duration_ms: Some(started_at.elapsed().as_millis() as u64),
            detail,
        }
    }
}

/// Caller-supplied hooks around each removal
///
/// Every method has a pass-through default, so an implementation only
/// overrides the hooks it needs.
#[async_trait]
pub trait PipelineHooks: Send + Sync {
    /// Transform the raw input before it is normalized
    async fn before_process(&self, input: RemovalInput, _options: &RemoveOptions) -> RemovalInput {
        input
    }

    /// Observe the finished result
    async fn after_process(
        &self,
        _result: &RemovalResult,
        _input: &RemovalInput,
        _options: &RemoveOptions,
    ) {
    }

    /// Receive telemetry events
    fn telemetry(&self, _event: &TelemetryEvent) {}
}

/// Emit an event to optional hooks
pub(crate) fn emit(hooks: Option<&Arc<dyn PipelineHooks>>, event: &TelemetryEvent) {
    tracing::trace!(kind = %event.kind, duration_ms = ?event.duration_ms, "telemetry");
    if let Some(hooks) = hooks {
        hooks.telemetry(event);
    }
}

/// Start, success and error kinds of one operation
pub(crate) type OperationKinds = (TelemetryKind, TelemetryKind, TelemetryKind);

pub(crate) const LOAD: OperationKinds = (
    TelemetryKind::LoadStart,
    TelemetryKind::LoadSuccess,
    TelemetryKind::LoadError,
);
pub(crate) const REMOVE: OperationKinds = (
    TelemetryKind::RemoveStart,
    TelemetryKind::RemoveSuccess,
    TelemetryKind::RemoveError,
);
pub(crate) const REMOVE_MANY: OperationKinds = (
    TelemetryKind::RemoveManyStart,
    TelemetryKind::RemoveManySuccess,
    TelemetryKind::RemoveManyError,
);

/// Run an operation between a start event and exactly one outcome event
pub(crate) async fn observe<T, Fut>(
    hooks: Option<&Arc<dyn PipelineHooks>>,
    (start, success, failure): OperationKinds,
    operation: Fut,
) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    let started_at = Instant::now();
    emit(hooks, &TelemetryEvent::start(start));
    let outcome = operation.await;
    let event = match &outcome {
        Ok(_) => TelemetryEvent::finished(success, started_at, None),
        Err(e) => TelemetryEvent::finished(failure, started_at, Some(e.message().to_string())),
    };
    emit(hooks, &event);
    outcome
}
