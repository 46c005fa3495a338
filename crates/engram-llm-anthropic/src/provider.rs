//! Anthropic [`CompletionService`] implementation.

use std::collections::HashSet;

use engram_llm::attachment::resolve_images;
use engram_llm::completion::{Capability, CompletionService, ModelOptions, ProviderMetadata};
use engram_llm::error::LlmError;
use engram_llm::stream::{CompletionStream, decode_body};
use engram_llm::Message;
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::instrument;

use crate::config::AnthropicConfig;
use crate::convert;
use crate::stream::AnthropicDecoder;

/// Completion service for the Anthropic Messages API.
///
/// Tool calls use the API's native `tool_use` blocks.
///
/// # Example
///
/// ```rust,no_run
/// use engram_llm::{complete_batch, Message, ModelOptions};
/// use engram_llm_anthropic::{AnthropicCompletions, AnthropicConfig};
///
/// # async fn example() -> Result<(), engram_llm::LlmError> {
/// let service = AnthropicCompletions::new(AnthropicConfig {
///     api_key: std::env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
///     ..Default::default()
/// });
/// let history = vec![Message::system("Be concise."), Message::user("Hello!")];
/// let answer = complete_batch(&service, &history, &ModelOptions::default()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct AnthropicCompletions {
    config: AnthropicConfig,
    client: reqwest::Client,
}

impl AnthropicCompletions {
    /// Creates a service from configuration.
    ///
    /// Reuses `config.client` when present.
    pub fn new(config: AnthropicConfig) -> Self {
        let client = config.client.clone().unwrap_or_else(|| {
            let mut builder = reqwest::Client::builder();
            if let Some(timeout) = config.timeout {
                builder = builder.timeout(timeout);
            }
            builder.build().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to a default HTTP client");
                reqwest::Client::new()
            })
        });
        Self { config, client }
    }

    fn default_headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.config.api_key)
                .map_err(|_| LlmError::Auth("API key contains invalid header characters".into()))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_str(&self.config.api_version).map_err(|_| {
                LlmError::InvalidRequest("API version contains invalid header characters".into())
            })?,
        );
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn messages_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{base}/v1/messages")
    }

    async fn send_request(
        &self,
        history: &[Message],
        options: &ModelOptions,
    ) -> Result<reqwest::Response, LlmError> {
        let request_body = convert::build_request(history, options, &self.config)?;

        let response = self
            .client
            .post(self.messages_url())
            .headers(self.default_headers()?)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        elapsed_ms: self
                            .config
                            .timeout
                            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
                    }
                } else {
                    LlmError::Http {
                        status: None,
                        message: e.to_string(),
                        retryable: e.is_connect(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let http_status = http::StatusCode::from_u16(status.as_u16())
                .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR);
            return Err(convert::convert_error(http_status, &body));
        }

        Ok(response)
    }
}

impl CompletionService for AnthropicCompletions {
    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn complete(
        &self,
        history: &[Message],
        options: &ModelOptions,
    ) -> Result<CompletionStream, LlmError> {
        let history = resolve_images(history, self.config.attachments.as_deref()).await?;
        let response = self.send_request(&history, options).await?;
        Ok(decode_body(response.bytes_stream(), AnthropicDecoder::new()))
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: "anthropic".into(),
            model: self.config.model.clone(),
            context_window: context_window_for_model(&self.config.model),
            capabilities: HashSet::from([
                Capability::Tools,
                Capability::NativeTools,
                Capability::ImageInput,
            ]),
        }
    }
}

fn context_window_for_model(model: &str) -> u64 {
    if model.contains("claude") {
        200_000
    } else {
        100_000
    }
}
