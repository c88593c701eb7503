//! Worker side of the bridge: a client answering requests off the caller's thread

use super::client::WorkerFactory;
use super::protocol::{
    RemovalPayload, RequestBody, WorkerChannel, WorkerRequest, WorkerResponse, WorkerTransport,
};
use crate::{
    client::{Client, ClientBuilder, RemovalClient},
    error::{RemovalError, Result},
    input::RemovalInput,
    types::LoadOptions,
};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace};

const WORKER_THREAD_NAME: &str = "bgremove-worker";

/// Dispatches worker requests to a foreground client
#[derive(Debug, Clone)]
pub struct WorkerRuntime {
    client: Client,
}

impl WorkerRuntime {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Answer one request; failures become `ok = false` responses
    pub async fn handle(&self, request: WorkerRequest) -> WorkerResponse {
        let WorkerRequest { request_id, body } = request;
        trace!(request_id = %request_id, kind = body.kind(), "Handling worker request");
        match self.execute(&request_id, body).await {
            Ok(response) => response,
            Err(e) => {
                debug!(request_id = %request_id, error = %e, "Worker request failed");
                WorkerResponse::failure(request_id, e.message())
            },
        }
    }

    async fn execute(&self, request_id: &str, body: RequestBody) -> Result<WorkerResponse> {
        let response = WorkerResponse::success(request_id);
        match body {
            RequestBody::Load => {
                self.client.load(LoadOptions::default()).await?;
                Ok(response)
            },
            RequestBody::Remove { input, options } => {
                let result = self
                    .client
                    .remove(RemovalInput::from(input), options)
                    .await?;
                Ok(response.with_result(RemovalPayload::from(result)))
            },
            RequestBody::RemoveMany {
                inputs,
                options,
                batch_options,
            } => {
                let inputs = inputs.into_iter().map(RemovalInput::from).collect();
                let results = self
                    .client
                    .remove_many(inputs, options, batch_options)
                    .await?;
                Ok(response.with_results(results.into_iter().map(RemovalPayload::from).collect()))
            },
            RequestBody::GetLoadedModelLabel => {
                Ok(response.with_label(self.client.loaded_model_label()))
            },
            RequestBody::Dispose => {
                self.client.dispose();
                Ok(response)
            },
        }
    }

    /// Serve requests until the request stream closes
    ///
    /// Requests run concurrently; `dispose` is answered inline. In-flight
    /// requests are aborted once the stream closes.
    pub async fn run(
        self,
        mut requests: mpsc::UnboundedReceiver<WorkerRequest>,
        responses: mpsc::UnboundedSender<WorkerResponse>,
    ) {
        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                request = requests.recv() => {
                    let Some(request) = request else { break };
                    if matches!(request.body, RequestBody::Dispose) {
                        let response = self.handle(request).await;
                        if responses.send(response).is_err() {
                            break;
                        }
                        continue;
                    }
                    let runtime = self.clone();
                    let responses = responses.clone();
                    tasks.spawn(async move {
                        let response = runtime.handle(request).await;
                        if responses.send(response).is_err() {
                            trace!("Worker response dropped; client gone");
                        }
                    });
                },
                Some(joined) = tasks.join_next() => {
                    if let Err(e) = joined {
                        error!("Worker task failed: {}", e);
                    }
                },
            }
        }
        tasks.shutdown().await;
        debug!("Worker stopped");
    }
}

/// Sending half of a thread-hosted worker
#[derive(Debug)]
pub struct ThreadTransport {
    sender: Mutex<Option<mpsc::UnboundedSender<WorkerRequest>>>,
}

impl ThreadTransport {
    fn new(sender: mpsc::UnboundedSender<WorkerRequest>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    fn sender(&self) -> std::sync::MutexGuard<'_, Option<mpsc::UnboundedSender<WorkerRequest>>> {
        match self.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl WorkerTransport for ThreadTransport {
    fn post_message(&self, request: WorkerRequest) -> Result<()> {
        let sender = self.sender();
        let sender = sender
            .as_ref()
            .ok_or_else(|| RemovalError::protocol("Worker is not running."))?;
        sender
            .send(request)
            .map_err(|_| RemovalError::protocol("Worker is not running."))
    }

    fn terminate(&self) {
        if self.sender().take().is_some() {
            debug!("Worker terminated");
        }
    }
}

/// Hosts a [`WorkerRuntime`] on a dedicated thread with its own runtime
pub struct BackgroundWorker;

impl BackgroundWorker {
    /// Build a client from `builder` and serve it on a new thread
    pub fn spawn(builder: ClientBuilder) -> Result<WorkerChannel> {
        let client = builder.build()?;
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();

        std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("Failed to start worker runtime: {}", e);
                        return;
                    },
                };
                runtime.block_on(WorkerRuntime::new(client).run(request_rx, response_tx));
            })
            .map_err(|e| RemovalError::internal(format!("Failed to spawn worker thread: {}", e)))?;

        info!("Background worker started");
        Ok(WorkerChannel {
            transport: Box::new(ThreadTransport::new(request_tx)),
            responses: response_rx,
        })
    }

    /// Factory spawning a fresh worker from `builder` on each call
    #[must_use]
    pub fn factory(builder: ClientBuilder) -> WorkerFactory {
        Arc::new(move || Self::spawn(builder.clone()))
    }
}
