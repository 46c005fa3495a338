//! `OpenAI` adapter configuration.

use std::sync::Arc;
use std::time::Duration;

use engram_llm::attachment::AttachmentResolver;

/// Configuration for [`OpenAiCompletions`](crate::OpenAiCompletions).
///
/// Any server speaking the `OpenAI` chat completions protocol works by
/// pointing `base_url` at it:
///
/// ```rust
/// use engram_llm_openai::OpenAiConfig;
///
/// let config = OpenAiConfig {
///     api_key: "sk-...".into(),
///     model: "mistral-small-latest".into(),
///     base_url: "https://api.mistral.ai/v1".into(),
///     ..Default::default()
/// };
/// ```
#[derive(Clone)]
pub struct OpenAiConfig {
    /// API key, sent as a bearer token. Required.
    pub api_key: String,
    /// Model identifier (e.g. `"gpt-4o"`).
    pub model: String,
    /// Base URL for the API, without the `/chat/completions` suffix.
    pub base_url: String,
    /// Optional organization ID header.
    pub organization: Option<String>,
    /// Whole-request timeout, streaming included.
    pub timeout: Option<Duration>,
    /// Pre-configured HTTP client for connection pooling across adapters.
    /// When `None`, a new client is created.
    pub client: Option<reqwest::Client>,
    /// Resolves image attachment references before a request is sent.
    pub attachments: Option<Arc<dyn AttachmentResolver>>,
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("organization", &self.organization)
            .field("timeout", &self.timeout)
            .field("client", &self.client.as_ref().map(|_| "..."))
            .field("attachments", &self.attachments.as_ref().map(|_| "..."))
            .finish()
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gpt-4o".into(),
            base_url: "https://api.openai.com/v1".into(),
            organization: None,
            timeout: None,
            client: None,
            attachments: None,
        }
    }
}
