//! Foreground removal client
//!
//! Holds the resolved configuration and, once loaded, the model bundle. All
//! concurrent loads share one in-flight future; it is cleared as soon as it
//! settles, whatever the outcome.

use crate::{
    batch::run_ordered,
    config::{ClientConfig, ResolvedConfig},
    device::{detect, CapabilityProbe, SystemProbe},
    error::{RemovalError, Result},
    inference::{ModelRuntime, ProgressCallback},
    input::{DefaultNormalizer, InputNormalizer, RemovalInput},
    loader::{load_model_bundle, LoadedBundle},
    pipeline::remove_background_with_model,
    telemetry::{observe, LOAD, REMOVE, REMOVE_MANY},
    types::{BatchOptions, LoadOptions, RemovalResult, RemoveOptions},
};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Operations shared by foreground and worker-backed clients
#[async_trait]
pub trait RemovalClient: Send + Sync {
    /// Load the model bundle; a no-op when already loaded
    async fn load(&self, options: LoadOptions) -> Result<()>;

    /// Remove the background of one input, loading first if needed
    async fn remove(&self, input: RemovalInput, options: RemoveOptions) -> Result<RemovalResult>;

    /// Remove backgrounds of many inputs; results follow input order
    async fn remove_many(
        &self,
        inputs: Vec<RemovalInput>,
        options: RemoveOptions,
        batch: BatchOptions,
    ) -> Result<Vec<RemovalResult>>;

    /// Label of the loaded candidate, if any
    fn loaded_model_label(&self) -> Option<String>;

    /// Drop the loaded bundle and any in-flight load
    fn dispose(&self);
}

type SharedLoad = Shared<BoxFuture<'static, Result<Arc<LoadedBundle>>>>;

#[derive(Default)]
struct LoadState {
    bundle: Option<Arc<LoadedBundle>>,
    loading: Option<SharedLoad>,
    /// Bumped on dispose so a load started earlier cannot install its bundle
    generation: u64,
}

struct ClientInner {
    config: ResolvedConfig,
    runtime: Arc<dyn ModelRuntime>,
    probe: Arc<dyn CapabilityProbe>,
    normalizer: Arc<dyn InputNormalizer>,
    state: Mutex<LoadState>,
}

impl ClientInner {
    fn state(&self) -> MutexGuard<'_, LoadState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Client running the pipeline on the calling task
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("loaded_model_label", &self.loaded_model_label())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client with the native capability probe and URL fetcher
    pub fn new(config: Option<ClientConfig>, runtime: Arc<dyn ModelRuntime>) -> Result<Self> {
        let mut builder = Self::builder().runtime(runtime);
        if let Some(config) = config {
            builder = builder.config(config);
        }
        builder.build()
    }

    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Resolved configuration this client runs with
    #[must_use]
    pub fn config(&self) -> &ResolvedConfig {
        &self.inner.config
    }

    /// Whether a model bundle is currently loaded
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.inner.state().bundle.is_some()
    }

    /// Return the loaded bundle, starting or joining a load when needed
    async fn ensure_loaded(&self, on_progress: Option<ProgressCallback>) -> Result<Arc<LoadedBundle>> {
        let shared = {
            let mut state = self.inner.state();
            if let Some(bundle) = &state.bundle {
                return Ok(Arc::clone(bundle));
            }
            if let Some(loading) = state.loading.clone() {
                debug!("Joining in-flight model load");
                loading
            } else {
                let load = Self::start_load(Arc::clone(&self.inner), state.generation, on_progress);
                state.loading = Some(load.clone());
                load
            }
        };
        shared.await
    }

    fn start_load(
        inner: Arc<ClientInner>,
        generation: u64,
        on_progress: Option<ProgressCallback>,
    ) -> SharedLoad {
        async move {
            let hooks = inner.config.hooks.clone();
            let result = observe(hooks.as_ref(), LOAD, async {
                let profile = detect(inner.probe.as_ref());
                load_model_bundle(inner.runtime.as_ref(), &inner.config, &profile, on_progress)
                    .await
                    .map(Arc::new)
            })
            .await;

            let mut state = inner.state();
            state.loading = None;
            if state.generation == generation {
                if let Ok(bundle) = &result {
                    info!(label = %bundle.label, "Client ready");
                    state.bundle = Some(Arc::clone(bundle));
                }
            }
            drop(state);
            result
        }
        .boxed()
        .shared()
    }
}

#[async_trait]
impl RemovalClient for Client {
    async fn load(&self, options: LoadOptions) -> Result<()> {
        self.ensure_loaded(options.on_progress).await.map(|_| ())
    }

    async fn remove(&self, input: RemovalInput, options: RemoveOptions) -> Result<RemovalResult> {
        let inner = &self.inner;
        observe(inner.config.hooks.as_ref(), REMOVE, async {
            let bundle = self.ensure_loaded(None).await?;
            remove_background_with_model(
                &bundle,
                &inner.config,
                inner.probe.as_ref(),
                inner.normalizer.as_ref(),
                input,
                &options,
            )
            .await
        })
        .await
    }

    async fn remove_many(
        &self,
        inputs: Vec<RemovalInput>,
        options: RemoveOptions,
        batch: BatchOptions,
    ) -> Result<Vec<RemovalResult>> {
        let hooks = self.inner.config.hooks.clone();
        observe(hooks.as_ref(), REMOVE_MANY, async {
            let options = &options;
            run_ordered(inputs, batch.concurrency, |_, input| {
                self.remove(input, options.clone())
            })
            .await
        })
        .await
    }

    fn loaded_model_label(&self) -> Option<String> {
        self.inner
            .state()
            .bundle
            .as_ref()
            .map(|bundle| bundle.label.clone())
    }

    fn dispose(&self) {
        let mut state = self.inner.state();
        state.bundle = None;
        state.loading = None;
        state.generation += 1;
        debug!("Client disposed");
    }
}

/// Builder for [`Client`]
#[derive(Clone, Default)]
pub struct ClientBuilder {
    config: Option<ClientConfig>,
    runtime: Option<Arc<dyn ModelRuntime>>,
    probe: Option<Arc<dyn CapabilityProbe>>,
    normalizer: Option<Arc<dyn InputNormalizer>>,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("runtime", &self.runtime.is_some())
            .field("probe", &self.probe.is_some())
            .field("normalizer", &self.normalizer.is_some())
            .finish()
    }
}

impl ClientBuilder {
    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    #[must_use]
    pub fn runtime(mut self, runtime: Arc<dyn ModelRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn CapabilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    #[must_use]
    pub fn normalizer(mut self, normalizer: Arc<dyn InputNormalizer>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    /// Partial configuration this builder will resolve
    #[must_use]
    pub fn client_config(&self) -> Option<&ClientConfig> {
        self.config.as_ref()
    }

    /// Resolve and validate the configuration, then configure the runtime
    pub fn build(self) -> Result<Client> {
        let runtime = self
            .runtime
            .ok_or_else(|| RemovalError::invalid_config("A model runtime is required"))?;
        let config = crate::config::resolve(self.config.as_ref());
        config.validate()?;

        let probe = match self.probe {
            Some(probe) => probe,
            None => Arc::new(SystemProbe::new()),
        };
        let normalizer = match self.normalizer {
            Some(normalizer) => normalizer,
            None => Arc::new(DefaultNormalizer::http()?),
        };

        runtime.configure(&config.runtime);
        debug!(signature = %config.signature(), "Client created");

        Ok(Client {
            inner: Arc::new(ClientInner {
                config,
                runtime,
                probe,
                normalizer,
                state: Mutex::new(LoadState::default()),
            }),
        })
    }
}
