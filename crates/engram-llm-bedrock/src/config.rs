//! Bedrock adapter configuration.

use std::str::FromStr;
use std::time::Duration;

use engram_llm::error::LlmError;

/// Request body family of a Bedrock text model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyStyle {
    /// Anthropic Claude text completions (`prompt` / `max_tokens_to_sample`).
    Claude,
    /// Cohere Command generation (`prompt` / `max_tokens` / `stream`).
    Cohere,
}

impl BodyStyle {
    /// Infers the body style from a Bedrock model id such as
    /// `"anthropic.claude-v2"` or `"cohere.command-text-v14"`.
    pub fn for_model(model: &str) -> Option<Self> {
        // Cross-region inference profiles prefix the id with a geography.
        let base = model
            .split_once('.')
            .filter(|(prefix, _)| matches!(*prefix, "us" | "eu" | "apac"))
            .map_or(model, |(_, rest)| rest);
        if base.starts_with("anthropic.") {
            Some(Self::Claude)
        } else if base.starts_with("cohere.") {
            Some(Self::Cohere)
        } else {
            None
        }
    }
}

impl FromStr for BodyStyle {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude" => Ok(Self::Claude),
            "cohere" => Ok(Self::Cohere),
            other => Err(LlmError::InvalidRequest(format!(
                "unknown Bedrock body style: {other} (expected claude or cohere)"
            ))),
        }
    }
}

/// Configuration for [`BedrockCompletions`](crate::BedrockCompletions).
///
/// ```rust
/// use engram_llm_bedrock::{BedrockConfig, BodyStyle};
///
/// let config = BedrockConfig {
///     api_key: "bedrock-api-key".into(),
///     model: "cohere.command-text-v14".into(),
///     ..Default::default()
/// };
/// assert_eq!(config.body_style().unwrap(), BodyStyle::Cohere);
/// assert_eq!(config.endpoint(), "https://bedrock-runtime.us-east-1.amazonaws.com");
/// ```
#[derive(Clone)]
pub struct BedrockConfig {
    /// Bedrock API key, sent as a bearer token.
    pub api_key: String,
    /// Bedrock model id.
    pub model: String,
    /// AWS region of the runtime endpoint.
    pub region: String,
    /// Endpoint override. When `None`, the regional runtime endpoint is used.
    pub base_url: Option<String>,
    /// Body style override. When `None`, it is inferred from `model`.
    pub style: Option<BodyStyle>,
    /// Output token limit used when the options do not set one.
    pub max_tokens: u32,
    /// Whole-request timeout, streaming included.
    pub timeout: Option<Duration>,
    /// Pre-configured HTTP client for connection pooling across adapters.
    pub client: Option<reqwest::Client>,
}

impl BedrockConfig {
    /// The runtime endpoint requests go to.
    pub fn endpoint(&self) -> String {
        self.base_url.clone().unwrap_or_else(|| {
            format!("https://bedrock-runtime.{}.amazonaws.com", self.region)
        })
    }

    /// The configured or inferred body style.
    pub fn body_style(&self) -> Result<BodyStyle, LlmError> {
        self.style
            .or_else(|| BodyStyle::for_model(&self.model))
            .ok_or_else(|| {
                LlmError::InvalidRequest(format!(
                    "cannot infer a Bedrock body style for {}; set it explicitly",
                    self.model
                ))
            })
    }
}

impl std::fmt::Debug for BedrockConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BedrockConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("region", &self.region)
            .field("base_url", &self.base_url)
            .field("style", &self.style)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .field("client", &self.client.as_ref().map(|_| "..."))
            .finish()
    }
}

impl Default for BedrockConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "anthropic.claude-v2".into(),
            region: "us-east-1".into(),
            base_url: None,
            style: None,
            max_tokens: 1000,
            timeout: None,
            client: None,
        }
    }
}
