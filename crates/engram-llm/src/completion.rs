//! The Completion Service contract and request options.
//!
//! This module defines two core abstractions:
//!
//! - **[`CompletionService`]**: the trait every adapter and orchestrator
//!   implements. It uses Rust 2024's native async-fn-in-traits, so
//!   implementations are plain `async fn`s.
//!
//! - **[`DynCompletionService`]**: an object-safe mirror with boxed
//!   futures. A blanket `impl<T: CompletionService> DynCompletionService for T`
//!   bridges the two, so any service can be stored as
//!   `Arc<dyn DynCompletionService>`. Orchestrators compose services
//!   through this trait.
//!
//! Two derived consumption modes sit on top of the event stream:
//! [`complete_batch`] (text only) and [`complete_tool_calls`] (calls only).

use std::borrow::Cow;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::chat::{Message, ToolCall};
use crate::error::LlmError;
use crate::stream::{CompletionEvent, CompletionStream};
use crate::tool::{JsonSchema, ToolDescriptor};

/// A uniform streaming completion interface.
///
/// The returned stream is produced incrementally, is single-use, and is
/// finite. If the request fails before any event is available, `complete`
/// itself returns `Err`; later failures arrive as an `Err` item that ends
/// the stream.
pub trait CompletionService: Send + Sync {
    /// Starts a completion over `history`.
    fn complete(
        &self,
        history: &[Message],
        options: &ModelOptions,
    ) -> impl Future<Output = Result<CompletionStream, LlmError>> + Send;

    /// Describes the backend behind this service.
    fn metadata(&self) -> ProviderMetadata;
}

/// Object-safe counterpart of [`CompletionService`].
///
/// Implemented automatically for every `CompletionService`.
pub trait DynCompletionService: Send + Sync {
    /// Boxed-future version of [`CompletionService::complete`].
    fn complete_boxed<'a>(
        &'a self,
        history: &'a [Message],
        options: &'a ModelOptions,
    ) -> Pin<Box<dyn Future<Output = Result<CompletionStream, LlmError>> + Send + 'a>>;

    /// Describes the backend behind this service.
    fn metadata(&self) -> ProviderMetadata;
}

impl<T: CompletionService> DynCompletionService for T {
    fn complete_boxed<'a>(
        &'a self,
        history: &'a [Message],
        options: &'a ModelOptions,
    ) -> Pin<Box<dyn Future<Output = Result<CompletionStream, LlmError>> + Send + 'a>> {
        Box::pin(self.complete(history, options))
    }

    fn metadata(&self) -> ProviderMetadata {
        CompletionService::metadata(self)
    }
}

/// Describes a service instance: provider name, model, and capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Provider name (e.g. `"openai"`, `"amalgam"`).
    pub name: Cow<'static, str>,
    /// The model identifier sent to the backend.
    pub model: String,
    /// Maximum context window size in tokens.
    pub context_window: u64,
    /// Features this service supports.
    pub capabilities: HashSet<Capability>,
}

/// A feature a service may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum Capability {
    /// Emits `ToolCalls` events when tools are enabled.
    Tools,
    /// Tool calls come from the backend's native function calling rather
    /// than a prompt codec.
    NativeTools,
    /// Accepts image parts.
    ImageInput,
    /// Honors [`ModelOptions::structured_output`] natively.
    StructuredOutput,
}

/// Per-invocation generation options.
///
/// Use struct-update syntax with [`Default`]:
///
/// ```rust
/// use engram_llm::ModelOptions;
///
/// let options = ModelOptions {
///     temperature: Some(0.01),
///     max_tokens: Some(10),
///     ..Default::default()
/// };
/// assert!(options.enabled_tools.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelOptions {
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum output tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Stop sequences.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    /// Tools the model may call. Empty disables tool use.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enabled_tools: Vec<ToolDescriptor>,
    /// Constrain the output to JSON matching this schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<JsonSchema>,
}

impl ModelOptions {
    /// A copy of these options with tool use disabled.
    #[must_use]
    pub fn without_tools(&self) -> Self {
        Self {
            enabled_tools: Vec::new(),
            ..self.clone()
        }
    }

    /// Returns `true` if at least one tool is enabled.
    pub fn has_tools(&self) -> bool {
        !self.enabled_tools.is_empty()
    }
}

/// Runs a completion and collects its text.
///
/// Tool calls are not representable in batch mode and fail with
/// [`LlmError::Contract`].
pub async fn complete_batch(
    service: &dyn DynCompletionService,
    history: &[Message],
    options: &ModelOptions,
) -> Result<String, LlmError> {
    let mut stream = service.complete_boxed(history, options).await?;
    let mut text = String::new();
    while let Some(event) = stream.next().await {
        match event? {
            CompletionEvent::Text { content } => text.push_str(&content),
            CompletionEvent::ToolCalls { .. } => {
                return Err(LlmError::Contract(
                    "batch completions do not support tool calls".into(),
                ));
            }
            CompletionEvent::End => return Ok(text),
        }
    }
    Err(LlmError::Contract("completion ended without an End event".into()))
}

/// Runs a completion that is expected to produce only tool calls.
///
/// Returns the calls of the `ToolCalls` event, or an empty list if the
/// stream ends without one. Whitespace-only text is tolerated; any other
/// text fails with [`LlmError::Contract`].
pub async fn complete_tool_calls(
    service: &dyn DynCompletionService,
    history: &[Message],
    options: &ModelOptions,
) -> Result<Vec<ToolCall>, LlmError> {
    let mut stream = service.complete_boxed(history, options).await?;
    while let Some(event) = stream.next().await {
        match event? {
            CompletionEvent::Text { content } if content.trim().is_empty() => {}
            CompletionEvent::Text { .. } => {
                return Err(LlmError::Contract(
                    "tool completions do not support text output".into(),
                ));
            }
            CompletionEvent::ToolCalls { calls } => return Ok(calls),
            CompletionEvent::End => return Ok(Vec::new()),
        }
    }
    Err(LlmError::Contract("completion ended without an End event".into()))
}
