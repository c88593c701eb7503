//! Client side of the worker bridge

use super::protocol::{RequestBody, WorkerChannel, WorkerRequest, WorkerResponse, WorkerTransport};
use crate::{
    client::{Client, ClientBuilder, RemovalClient},
    error::{RemovalError, Result},
    input::{RemovalInput, TransferableInput},
    types::{BatchOptions, LoadOptions, RemovalResult, RemoveOptions},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Creates a connected worker
pub type WorkerFactory = Arc<dyn Fn() -> Result<WorkerChannel> + Send + Sync>;

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<WorkerResponse>>>>;

/// Where removals run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Use a worker when one can be created
    #[default]
    Auto,
    /// Prefer a worker
    Worker,
    /// Always run on the calling task
    MainThread,
}

impl ExecutionMode {
    #[must_use]
    pub fn wants_worker(self) -> bool {
        matches!(self, Self::Auto | Self::Worker)
    }
}

/// Options for [`create_worker_client`]
#[derive(Clone, Default)]
pub struct WorkerClientOptions {
    /// Builder for the local client (and the fallback of a worker client)
    pub builder: ClientBuilder,
    pub mode: ExecutionMode,
    pub worker_factory: Option<WorkerFactory>,
}

impl std::fmt::Debug for WorkerClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerClientOptions")
            .field("builder", &self.builder)
            .field("mode", &self.mode)
            .field("worker_factory", &self.worker_factory.is_some())
            .finish()
    }
}

/// Whether this host can run a background worker
#[must_use]
pub fn supports_worker_mode() -> bool {
    cfg!(not(target_arch = "wasm32")) && tokio::runtime::Handle::try_current().is_ok()
}

/// Pick a worker-backed or local client for the requested mode
///
/// A worker is used only when the mode asks for one, the host supports it
/// and a factory is provided; otherwise the result is a plain local client.
pub fn create_worker_client(options: WorkerClientOptions) -> Result<Arc<dyn RemovalClient>> {
    let WorkerClientOptions {
        builder,
        mode,
        worker_factory,
    } = options;

    match worker_factory {
        Some(factory) if mode.wants_worker() && supports_worker_mode() => {
            let channel = factory()?;
            let fallback = builder.build()?;
            debug!(?mode, "Using worker-backed client");
            Ok(Arc::new(WorkerClient::new(channel, fallback)?))
        },
        _ => {
            debug!(?mode, "Using local client");
            Ok(Arc::new(builder.build()?))
        },
    }
}

/// Discard the outcome of a best-effort operation
pub fn attempt_ignore<T>(outcome: Result<T>) {
    if let Err(e) = outcome {
        debug!(error = %e, "Ignoring best-effort failure");
    }
}

fn lock(pending: &PendingMap) -> MutexGuard<'_, HashMap<String, oneshot::Sender<WorkerResponse>>> {
    match pending.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Response slot for one posted request
#[derive(Debug)]
pub struct PendingResponse {
    request_id: String,
    receiver: oneshot::Receiver<WorkerResponse>,
}

impl PendingResponse {
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Wait for the correlated response; `ok = false` becomes an error
    pub async fn wait(self) -> Result<WorkerResponse> {
        let response = self.receiver.await.map_err(|_| {
            RemovalError::protocol(format!(
                "Worker closed before answering {}.",
                self.request_id
            ))
        })?;
        if response.ok {
            Ok(response)
        } else {
            Err(RemovalError::protocol(
                response
                    .error
                    .unwrap_or_else(|| "Worker request failed.".to_string()),
            ))
        }
    }
}

/// Client forwarding boundary-safe work to a background worker
///
/// Inputs that cannot cross the boundary run on a local fallback client.
pub struct WorkerClient {
    transport: Box<dyn WorkerTransport>,
    pending: PendingMap,
    counter: AtomicU64,
    fallback: Client,
    dispatcher: JoinHandle<()>,
}

impl std::fmt::Debug for WorkerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerClient")
            .field("pending", &lock(&self.pending).len())
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

impl WorkerClient {
    /// Wrap a connected worker; must be called inside a tokio runtime
    pub fn new(channel: WorkerChannel, fallback: Client) -> Result<Self> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            RemovalError::internal("Worker clients must be created inside a tokio runtime")
        })?;
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let dispatcher = handle.spawn(dispatch(channel.responses, Arc::clone(&pending)));

        Ok(Self {
            transport: channel.transport,
            pending,
            counter: AtomicU64::new(0),
            fallback,
            dispatcher,
        })
    }

    fn next_request_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("worker-{}", n)
    }

    /// Register a response slot and post the request
    pub fn send_request(&self, body: RequestBody) -> Result<PendingResponse> {
        let request_id = self.next_request_id();
        let (sender, receiver) = oneshot::channel();
        lock(&self.pending).insert(request_id.clone(), sender);

        trace!(request_id = %request_id, kind = body.kind(), "Posting worker request");
        let posted = self.transport.post_message(WorkerRequest {
            request_id: request_id.clone(),
            body,
        });
        if let Err(e) = posted {
            lock(&self.pending).remove(&request_id);
            return Err(e);
        }

        Ok(PendingResponse {
            request_id,
            receiver,
        })
    }

    async fn request(&self, body: RequestBody) -> Result<WorkerResponse> {
        self.send_request(body)?.wait().await
    }

    /// Ask the worker for the label of its loaded model
    pub async fn remote_loaded_model_label(&self) -> Result<Option<String>> {
        Ok(self.request(RequestBody::GetLoadedModelLabel).await?.label)
    }

    /// Requests posted but not yet answered
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        lock(&self.pending).len()
    }
}

async fn dispatch(mut responses: mpsc::UnboundedReceiver<WorkerResponse>, pending: PendingMap) {
    while let Some(response) = responses.recv().await {
        let waiter = lock(&pending).remove(&response.request_id);
        match waiter {
            Some(waiter) => {
                // the caller may have stopped waiting
                let _ = waiter.send(response);
            },
            None => trace!(request_id = %response.request_id, "Dropping unmatched worker response"),
        }
    }
    debug!("Worker response stream closed");
    lock(&pending).clear();
}

#[async_trait]
impl RemovalClient for WorkerClient {
    async fn load(&self, options: LoadOptions) -> Result<()> {
        if options.on_progress.is_some() {
            debug!("Progress callbacks are not forwarded to the worker");
        }
        self.request(RequestBody::Load).await.map(|_| ())
    }

    async fn remove(&self, input: RemovalInput, options: RemoveOptions) -> Result<RemovalResult> {
        let input = match input.into_transferable() {
            Ok(input) => input,
            Err(local) => {
                debug!(input = local.kind(), "Input cannot cross the worker boundary");
                return self.fallback.remove(local, options).await;
            },
        };

        let response = self
            .request(RequestBody::Remove { input, options })
            .await?;
        response.result.map(RemovalResult::from).ok_or_else(|| {
            RemovalError::protocol("Worker remove response missing result payload.")
        })
    }

    async fn remove_many(
        &self,
        inputs: Vec<RemovalInput>,
        options: RemoveOptions,
        batch: BatchOptions,
    ) -> Result<Vec<RemovalResult>> {
        if !inputs.iter().all(RemovalInput::is_boundary_safe) {
            debug!("Batch holds inputs that cannot cross the worker boundary");
            return self.fallback.remove_many(inputs, options, batch).await;
        }

        let inputs = inputs
            .into_iter()
            .map(|input| {
                input.into_transferable().map_err(|local| {
                    RemovalError::internal(format!("{} input is not transferable", local.kind()))
                })
            })
            .collect::<Result<Vec<TransferableInput>>>()?;

        let response = self
            .request(RequestBody::RemoveMany {
                inputs,
                options,
                batch_options: batch,
            })
            .await?;
        let results = response.results.ok_or_else(|| {
            RemovalError::protocol("Worker removeMany response missing results payload.")
        })?;
        Ok(results.into_iter().map(RemovalResult::from).collect())
    }

    /// Answers from the fallback client; see [`WorkerClient::remote_loaded_model_label`]
    fn loaded_model_label(&self) -> Option<String> {
        self.fallback.loaded_model_label()
    }

    fn dispose(&self) {
        attempt_ignore(self.send_request(RequestBody::Dispose));
        self.transport.terminate();
        self.fallback.dispose();
    }
}

impl Drop for WorkerClient {
    fn drop(&mut self) {
        if !lock(&self.pending).is_empty() {
            warn!("Worker client dropped with requests in flight");
        }
        self.dispatcher.abort();
    }
}
