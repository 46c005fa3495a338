//! Configuration-driven construction and lookup of completion services.
//!
//! Two registries, both plain values built once at startup and passed to
//! whatever needs them:
//!
//! - [`ProviderRegistry`] maps provider names (`"openai"`, `"bedrock"`, …)
//!   to [`ProviderFactory`]s that turn a [`ProviderConfig`] into a service.
//! - [`ModelRegistry`] maps model ids to a ready service plus its
//!   [`ModelMetadata`] and [`TokenCounter`].
//!
//! ```rust,no_run
//! use engram_llm::registry::{ModelRegistry, ProviderConfig, ProviderRegistry};
//! use engram_llm::usage::ModelMetadata;
//!
//! # fn example(providers: ProviderRegistry) -> Result<(), engram_llm::LlmError> {
//! let mut models = ModelRegistry::new();
//! models.build_from(
//!     &providers,
//!     "claude",
//!     &ProviderConfig::new("bedrock", "anthropic.claude-v2")
//!         .api_key("token")
//!         .extra("tool_format", "xml"),
//!     ModelMetadata { max_tokens: 100_000, ..Default::default() },
//! )?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use crate::chat::{Message, ToolCall, validate_history};
use crate::codec::ToolFormat;
use crate::completion::{DynCompletionService, ModelOptions, complete_batch, complete_tool_calls};
use crate::error::LlmError;
use crate::prompted::PromptedTools;
use crate::stream::CompletionStream;
use crate::usage::{ModelMetadata, SimpleTokenCounter, TokenCounter};

/// Settings for building one service through a [`ProviderFactory`].
///
/// Common fields cover every adapter; anything adapter-specific goes in
/// `extra`, documented by each factory. The key `tool_format`
/// (`"json"`, `"xml"` or `"raven"`) is understood by all factories and
/// wraps the service in [`PromptedTools`].
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    /// Provider name used to pick the factory.
    pub provider: String,
    /// API key or bearer token.
    pub api_key: Option<String>,
    /// Model identifier sent to the backend.
    pub model: String,
    /// Overrides the adapter's default endpoint.
    pub base_url: Option<String>,
    /// Request timeout.
    pub timeout: Option<Duration>,
    /// Adapter-specific options.
    pub extra: HashMap<String, serde_json::Value>,
}

impl ProviderConfig {
    /// Creates a config for `provider` and `model`.
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    /// Sets the API key.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the base URL.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Adds an adapter-specific option.
    #[must_use]
    pub fn extra(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Gets a string option.
    pub fn get_extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }

    /// Gets a bool option.
    pub fn get_extra_bool(&self, key: &str) -> Option<bool> {
        self.extra.get(key).and_then(serde_json::Value::as_bool)
    }

    /// Gets an integer option.
    pub fn get_extra_i64(&self, key: &str) -> Option<i64> {
        self.extra.get(key).and_then(serde_json::Value::as_i64)
    }

    /// The prompted tool format requested via `extra.tool_format`.
    pub fn tool_format(&self) -> Result<Option<ToolFormat>, LlmError> {
        self.get_extra_str("tool_format")
            .map(str::parse::<ToolFormat>)
            .transpose()
    }

    /// The API key, or an [`LlmError::InvalidRequest`] naming `provider`.
    pub fn require_api_key(&self) -> Result<String, LlmError> {
        self.api_key.clone().ok_or_else(|| {
            LlmError::InvalidRequest(format!("{} provider requires api_key", self.provider))
        })
    }

    /// Fails unless a model is set.
    pub fn require_model(&self) -> Result<(), LlmError> {
        if self.model.is_empty() {
            return Err(LlmError::InvalidRequest(format!(
                "{} provider requires model",
                self.provider
            )));
        }
        Ok(())
    }

    /// Wraps `service` in [`PromptedTools`] when a tool format is requested,
    /// falling back to `default` when none is.
    pub fn apply_tool_format(
        &self,
        service: Arc<dyn DynCompletionService>,
        default: Option<ToolFormat>,
    ) -> Result<Arc<dyn DynCompletionService>, LlmError> {
        Ok(match self.tool_format()?.or(default) {
            Some(format) => Arc::new(PromptedTools::new(service, format.codec())),
            None => service,
        })
    }
}

/// Builds services of one provider from configuration.
pub trait ProviderFactory: Send + Sync {
    /// Lowercase provider name used for registration and lookup.
    fn name(&self) -> &str;

    /// Creates a service.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::InvalidRequest`] if required settings are
    /// missing or malformed.
    fn build(&self, config: &ProviderConfig) -> Result<Arc<dyn DynCompletionService>, LlmError>;
}

/// Provider name → factory.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: HashMap<String, Arc<dyn ProviderFactory>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.factories.keys().collect();
        f.debug_struct("ProviderRegistry")
            .field("providers", &names)
            .finish()
    }
}

impl ProviderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory, replacing any with the same name.
    pub fn register(&mut self, factory: impl ProviderFactory + 'static) -> &mut Self {
        let name = factory.name().to_lowercase();
        self.factories.insert(name, Arc::new(factory));
        self
    }

    /// Returns `true` if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.to_lowercase())
    }

    /// Names of all registered providers, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Builds a service with the factory named by `config.provider`.
    pub fn build(&self, config: &ProviderConfig) -> Result<Arc<dyn DynCompletionService>, LlmError> {
        let factory = self
            .factories
            .get(&config.provider.to_lowercase())
            .ok_or_else(|| {
                LlmError::InvalidRequest(format!(
                    "unknown provider '{}'. Available: {:?}",
                    config.provider,
                    self.providers()
                ))
            })?;
        factory.build(config)
    }
}

/// A registered model: its service and static facts.
#[derive(Clone)]
pub struct ModelEntry {
    /// The service answering completions for this model.
    pub service: Arc<dyn DynCompletionService>,
    /// Pricing and limits.
    pub metadata: ModelMetadata,
    /// Token estimator.
    pub token_counter: Arc<dyn TokenCounter>,
}

/// Model id → service, metadata and token counter.
#[derive(Default)]
pub struct ModelRegistry {
    models: HashMap<String, ModelEntry>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.ids())
            .finish()
    }
}

impl ModelRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a model, replacing any previous entry with the same id.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        service: Arc<dyn DynCompletionService>,
        token_counter: Arc<dyn TokenCounter>,
        metadata: ModelMetadata,
    ) -> &mut Self {
        let id = id.into();
        if self.models.contains_key(&id) {
            tracing::warn!(model = %id, "replacing registered model");
        }
        self.models.insert(
            id,
            ModelEntry {
                service,
                metadata,
                token_counter,
            },
        );
        self
    }

    /// Builds a service through `providers` and registers it under `id`
    /// with a [`SimpleTokenCounter`].
    pub fn build_from(
        &mut self,
        providers: &ProviderRegistry,
        id: impl Into<String>,
        config: &ProviderConfig,
        metadata: ModelMetadata,
    ) -> Result<&mut Self, LlmError> {
        let service = providers.build(config)?;
        Ok(self.register(id, service, Arc::new(SimpleTokenCounter::default()), metadata))
    }

    fn entry(&self, id: &str) -> Result<&ModelEntry, LlmError> {
        self.models
            .get(id)
            .ok_or_else(|| LlmError::UnknownModel(id.to_owned()))
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.models.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// The service for `id`.
    pub fn completions_for(&self, id: &str) -> Result<Arc<dyn DynCompletionService>, LlmError> {
        self.entry(id).map(|e| Arc::clone(&e.service))
    }

    /// The metadata for `id`.
    pub fn metadata_for(&self, id: &str) -> Result<&ModelMetadata, LlmError> {
        self.entry(id).map(|e| &e.metadata)
    }

    /// The token counter for `id`.
    pub fn token_counter_for(&self, id: &str) -> Result<Arc<dyn TokenCounter>, LlmError> {
        self.entry(id).map(|e| Arc::clone(&e.token_counter))
    }

    /// Validates `history` and starts a streaming completion on `id`.
    #[instrument(skip(self, history, options), fields(messages = history.len()))]
    pub async fn complete(
        &self,
        id: &str,
        history: &[Message],
        options: &ModelOptions,
    ) -> Result<CompletionStream, LlmError> {
        validate_history(history)?;
        let service = self.completions_for(id)?;
        service.complete_boxed(history, options).await
    }

    /// Validates `history` and runs a text-only completion on `id`.
    pub async fn batch(
        &self,
        id: &str,
        history: &[Message],
        options: &ModelOptions,
    ) -> Result<String, LlmError> {
        validate_history(history)?;
        let service = self.completions_for(id)?;
        complete_batch(service.as_ref(), history, options).await
    }

    /// Validates `history` and runs a calls-only completion on `id`.
    pub async fn tool_calls(
        &self,
        id: &str,
        history: &[Message],
        options: &ModelOptions,
    ) -> Result<Vec<ToolCall>, LlmError> {
        validate_history(history)?;
        let service = self.completions_for(id)?;
        complete_tool_calls(service.as_ref(), history, options).await
    }
}
