//! Wire messages exchanged with a background worker
//!
//! Requests and responses are correlated by `requestId`. Bitmaps travel by
//! value: posting a message moves its pixels to the other side.

use crate::{
    error::Result,
    input::TransferableInput,
    types::{BatchOptions, Bitmap, RemovalResult, RemoveOptions},
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Message from the client to the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRequest {
    pub request_id: String,
    #[serde(flatten)]
    pub body: RequestBody,
}

/// Request kinds, tagged by `type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RequestBody {
    /// Progress callbacks stay on the caller's side
    Load,
    Remove {
        input: TransferableInput,
        #[serde(default)]
        options: RemoveOptions,
    },
    #[serde(rename_all = "camelCase")]
    RemoveMany {
        inputs: Vec<TransferableInput>,
        #[serde(default)]
        options: RemoveOptions,
        #[serde(default)]
        batch_options: BatchOptions,
    },
    GetLoadedModelLabel,
    Dispose,
}

impl RequestBody {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Remove { .. } => "remove",
            Self::RemoveMany { .. } => "removeMany",
            Self::GetLoadedModelLabel => "getLoadedModelLabel",
            Self::Dispose => "dispose",
        }
    }
}

/// One matted image sent back by the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalPayload {
    pub bitmap: Bitmap,
    pub width: u32,
    pub height: u32,
}

impl From<RemovalResult> for RemovalPayload {
    fn from(result: RemovalResult) -> Self {
        let (width, height) = result.dimensions();
        Self {
            bitmap: result.into_bitmap(),
            width,
            height,
        }
    }
}

impl From<RemovalPayload> for RemovalResult {
    fn from(payload: RemovalPayload) -> Self {
        RemovalResult::new(payload.bitmap.into_image())
    }
}

/// Message from the worker to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResponse {
    pub request_id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RemovalPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<RemovalPayload>>,
}

impl WorkerResponse {
    /// Successful response without payload
    pub fn success<S: Into<String>>(request_id: S) -> Self {
        Self {
            request_id: request_id.into(),
            ok: true,
            error: None,
            label: None,
            result: None,
            results: None,
        }
    }

    /// Failed response carrying an error message
    pub fn failure<S: Into<String>, E: Into<String>>(request_id: S, error: E) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            ..Self::success(request_id)
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.label = label;
        self
    }

    #[must_use]
    pub fn with_result(mut self, result: RemovalPayload) -> Self {
        self.result = Some(result);
        self
    }

    #[must_use]
    pub fn with_results(mut self, results: Vec<RemovalPayload>) -> Self {
        self.results = Some(results);
        self
    }
}

/// Sending half of a worker connection
pub trait WorkerTransport: Send + Sync {
    /// Hand a request to the worker; ownership of its bitmaps moves with it
    fn post_message(&self, request: WorkerRequest) -> Result<()>;

    /// Stop the worker; later posts fail
    fn terminate(&self);
}

/// A connected worker: the transport plus the stream of its responses
pub struct WorkerChannel {
    pub transport: Box<dyn WorkerTransport>,
    pub responses: mpsc::UnboundedReceiver<WorkerResponse>,
}

impl std::fmt::Debug for WorkerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerChannel").finish_non_exhaustive()
    }
}
