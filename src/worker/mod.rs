//! Running removals on a background worker
//!
//! [`WorkerClient`] posts boundary-safe requests to a worker and correlates
//! the answers by request id. [`BackgroundWorker`] hosts the worker side on a
//! dedicated thread.

pub mod client;
pub mod protocol;
pub mod runtime;

pub use client::{
    attempt_ignore, create_worker_client, supports_worker_mode, ExecutionMode, PendingResponse,
    WorkerClient, WorkerClientOptions, WorkerFactory,
};
pub use protocol::{
    RemovalPayload, RequestBody, WorkerChannel, WorkerRequest, WorkerResponse, WorkerTransport,
};
pub use runtime::{BackgroundWorker, ThreadTransport, WorkerRuntime};
