//! Anthropic adapter configuration.

use std::sync::Arc;
use std::time::Duration;

use engram_llm::attachment::AttachmentResolver;

/// Configuration for [`AnthropicCompletions`](crate::AnthropicCompletions).
///
/// ```rust
/// use engram_llm_anthropic::AnthropicConfig;
///
/// let config = AnthropicConfig {
///     api_key: "sk-ant-api03-example".into(),
///     model: "claude-3-5-haiku-latest".into(),
///     ..Default::default()
/// };
/// assert_eq!(config.max_tokens, 1000);
/// ```
#[derive(Clone)]
pub struct AnthropicConfig {
    /// Key sent in the `x-api-key` header.
    pub api_key: String,
    /// Model identifier (e.g. `"claude-sonnet-4-20250514"`).
    pub model: String,
    /// API root; `/v1/messages` is appended.
    pub base_url: String,
    /// Output token limit used when the options do not set one. The API
    /// requires a limit on every request.
    pub max_tokens: u32,
    /// Value of the `anthropic-version` header.
    pub api_version: String,
    /// Whole-request timeout, streaming included.
    pub timeout: Option<Duration>,
    /// Shared HTTP client. `None` builds one honoring `timeout`.
    pub client: Option<reqwest::Client>,
    /// Resolves image attachment references before a request is sent.
    pub attachments: Option<Arc<dyn AttachmentResolver>>,
}

impl std::fmt::Debug for AnthropicConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .field("api_version", &self.api_version)
            .field("timeout", &self.timeout)
            .field("client", &self.client.as_ref().map(|_| "..."))
            .field("attachments", &self.attachments.as_ref().map(|_| "..."))
            .finish()
    }
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "claude-sonnet-4-20250514".into(),
            base_url: "https://api.anthropic.com".into(),
            max_tokens: 1000,
            api_version: "2023-06-01".into(),
            timeout: None,
            client: None,
            attachments: None,
        }
    }
}
