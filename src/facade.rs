//! Convenience facade over a lazily created, config-keyed [`Client`]

use crate::{
    client::{Client, ClientBuilder, RemovalClient},
    config::{config_signature, ClientConfig},
    error::Result,
    input::RemovalInput,
    types::{BatchOptions, LoadOptions, RemovalResult, RemoveOptions},
};
use log::debug;
use std::sync::{Mutex, MutexGuard};

struct Current {
    signature: String,
    client: Client,
}

/// Owns the client used by the one-call entry points
///
/// The client is created on first use and recreated whenever a call passes
/// a configuration with a different signature. The replaced client is
/// dropped, not disposed; requests already running on it finish normally.
pub struct DefaultClient {
    template: ClientBuilder,
    current: Mutex<Option<Current>>,
}

impl std::fmt::Debug for DefaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultClient")
            .field("template", &self.template)
            .field("signature", &self.signature())
            .finish()
    }
}

impl DefaultClient {
    /// `template` supplies the runtime, probe and normalizer of every client;
    /// its configuration is used when a call passes none
    #[must_use]
    pub fn new(template: ClientBuilder) -> Self {
        Self {
            template,
            current: Mutex::new(None),
        }
    }

    fn current(&self) -> MutexGuard<'_, Option<Current>> {
        match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Signature of the current client's configuration
    #[must_use]
    pub fn signature(&self) -> Option<String> {
        self.current().as_ref().map(|c| c.signature.clone())
    }

    /// Client for `config`, reusing the current one when signatures match
    pub fn client(&self, config: Option<&ClientConfig>) -> Result<Client> {
        let config = config.or_else(|| self.template.client_config());
        let signature = config_signature(config);

        let mut current = self.current();
        if let Some(existing) = current.as_ref().filter(|c| c.signature == signature) {
            return Ok(existing.client.clone());
        }

        let mut builder = self.template.clone();
        if let Some(config) = config {
            builder = builder.config(config.clone());
        }
        let client = builder.build()?;
        if current.is_some() {
            debug!("Configuration changed, replacing default client");
        }
        *current = Some(Current {
            signature,
            client: client.clone(),
        });
        Ok(client)
    }

    /// Remove the background of one input
    pub async fn remove_background(
        &self,
        input: RemovalInput,
        config: Option<&ClientConfig>,
        options: RemoveOptions,
    ) -> Result<RemovalResult> {
        self.client(config)?.remove(input, options).await
    }

    /// Remove backgrounds of many inputs, in input order
    pub async fn remove_many(
        &self,
        inputs: Vec<RemovalInput>,
        config: Option<&ClientConfig>,
        options: RemoveOptions,
        batch: BatchOptions,
    ) -> Result<Vec<RemovalResult>> {
        self.client(config)?
            .remove_many(inputs, options, batch)
            .await
    }

    /// Load the model ahead of the first removal
    pub async fn load_model(&self, config: Option<&ClientConfig>, options: LoadOptions) -> Result<()> {
        self.client(config)?.load(options).await
    }

    /// Label of the model loaded for `config`, if any
    pub fn loaded_model_label(&self, config: Option<&ClientConfig>) -> Result<Option<String>> {
        Ok(self.client(config)?.loaded_model_label())
    }

    /// Dispose and forget the current client
    pub fn dispose(&self) {
        let taken = self.current().take();
        if let Some(current) = taken {
            current.client.dispose();
            debug!("Default client disposed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{ClientPreset, ModelConfig},
        device::{HostCapabilities, StaticProbe},
        test_utils::{gradient_image, MockRuntime, RuntimeBehavior},
    };
    use std::sync::Arc;

    fn facade(runtime: Arc<MockRuntime>) -> DefaultClient {
        DefaultClient::new(
            Client::builder()
                .runtime(runtime)
                .probe(Arc::new(StaticProbe::new(HostCapabilities {
                    has_gpu: true,
                    user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_0)".to_string(),
                    mobile_hint: Some(false),
                    device_memory_gb: Some(16.0),
                    hardware_concurrency: Some(12),
                }))),
        )
    }

    #[tokio::test]
    async fn test_same_signature_reuses_client() {
        let runtime = Arc::new(MockRuntime::new(RuntimeBehavior::Succeed));
        let facade = facade(Arc::clone(&runtime));

        facade.load_model(None, LoadOptions::default()).await.unwrap();
        let label = facade.loaded_model_label(Some(&ClientConfig::default())).unwrap();
        assert_eq!(label.as_deref(), Some("WebGPU fp16 (desktop default)"));

        facade
            .remove_background(
                RemovalInput::from(gradient_image(4, 4)),
                None,
                RemoveOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(runtime.model_attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_signature_change_recreates_client() {
        let runtime = Arc::new(MockRuntime::new(RuntimeBehavior::Succeed));
        let facade = facade(Arc::clone(&runtime));

        facade.load_model(None, LoadOptions::default()).await.unwrap();
        let before = facade.signature().unwrap();

        let efficient = ClientConfig::default().with_preset(ClientPreset::FastMobile);
        assert_eq!(facade.loaded_model_label(Some(&efficient)).unwrap(), None);
        assert_ne!(facade.signature().unwrap(), before);

        facade
            .load_model(Some(&efficient), LoadOptions::default())
            .await
            .unwrap();
        assert_eq!(
            facade.loaded_model_label(Some(&efficient)).unwrap().as_deref(),
            Some("Forced WASM q8")
        );
    }

    #[tokio::test]
    async fn test_dispose_forgets_client() {
        let runtime = Arc::new(MockRuntime::new(RuntimeBehavior::Succeed));
        let facade = facade(runtime);
        let config = ClientConfig::default().with_model(ModelConfig {
            revision: Some("v2".to_string()),
            ..ModelConfig::default()
        });

        let client = facade.client(Some(&config)).unwrap();
        client.load(LoadOptions::default()).await.unwrap();
        facade.dispose();

        assert!(facade.signature().is_none());
        assert!(!client.is_loaded());
        assert_eq!(facade.loaded_model_label(Some(&config)).unwrap(), None);
    }
}
