//! `OpenAI` [`CompletionService`] implementation.

use std::collections::HashSet;

use engram_llm::attachment::resolve_images;
use engram_llm::completion::{Capability, CompletionService, ModelOptions, ProviderMetadata};
use engram_llm::error::LlmError;
use engram_llm::stream::{CompletionStream, decode_body};
use engram_llm::Message;
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::instrument;

use crate::config::OpenAiConfig;
use crate::convert;
use crate::stream::OpenAiDecoder;

/// Completion service for the `OpenAI` chat completions API and servers
/// that speak the same protocol.
///
/// Tool calls use the API's native function calling.
///
/// ```rust,no_run
/// use engram_llm::{complete_batch, Message, ModelOptions};
/// use engram_llm_openai::{OpenAiCompletions, OpenAiConfig};
///
/// # async fn example() -> Result<(), engram_llm::LlmError> {
/// let service = OpenAiCompletions::new(OpenAiConfig {
///     api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
///     model: "gpt-4o-mini".into(),
///     ..Default::default()
/// });
/// let history = vec![Message::system("Be brief."), Message::user("Hi!")];
/// let answer = complete_batch(&service, &history, &ModelOptions::default()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct OpenAiCompletions {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl OpenAiCompletions {
    /// Creates a service from the given configuration.
    ///
    /// Uses `config.client` when set; otherwise builds a client honoring
    /// `config.timeout`.
    pub fn new(config: OpenAiConfig) -> Self {
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

        let auth_value = format!("Bearer {}", self.config.api_key);
        headers.insert(
            "authorization",
            HeaderValue::from_str(&auth_value)
                .map_err(|_| LlmError::Auth("API key contains invalid header characters".into()))?,
        );
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("accept", HeaderValue::from_static("text/event-stream"));

        if let Some(org) = &self.config.organization {
            headers.insert(
                "openai-organization",
                HeaderValue::from_str(org).map_err(|_| {
                    LlmError::InvalidRequest(
                        "Organization ID contains invalid header characters".into(),
                    )
                })?,
            );
        }

        Ok(headers)
    }

    fn completions_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    async fn send_request(
        &self,
        history: &[Message],
        options: &ModelOptions,
    ) -> Result<reqwest::Response, LlmError> {
        let request_body = convert::build_request(history, options, &self.config)?;

        let response = self
            .client
            .post(self.completions_url())
            .headers(self.default_headers()?)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| transport_error(&e, &self.config))?;

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

fn transport_error(e: &reqwest::Error, config: &OpenAiConfig) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout {
            elapsed_ms: config
                .timeout
                .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        }
    } else {
        LlmError::Http {
            status: e.status().map(|s| {
                http::StatusCode::from_u16(s.as_u16())
                    .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR)
            }),
            message: e.to_string(),
            retryable: e.is_connect() || e.is_timeout(),
        }
    }
}

impl CompletionService for OpenAiCompletions {
    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn complete(
        &self,
        history: &[Message],
        options: &ModelOptions,
    ) -> Result<CompletionStream, LlmError> {
        let history = resolve_images(history, self.config.attachments.as_deref()).await?;
        let response = self.send_request(&history, options).await?;
        Ok(decode_body(response.bytes_stream(), OpenAiDecoder::new()))
    }

    fn metadata(&self) -> ProviderMetadata {
        let capabilities = HashSet::from([
            Capability::Tools,
            Capability::NativeTools,
            Capability::ImageInput,
            Capability::StructuredOutput,
        ]);

        ProviderMetadata {
            name: "openai".into(),
            model: self.config.model.clone(),
            context_window: context_window_for_model(&self.config.model),
            capabilities,
        }
    }
}

fn context_window_for_model(model: &str) -> u64 {
    if model.starts_with("gpt-4o") || model.starts_with("gpt-4.1") {
        128_000
    } else if model.starts_with("o1") || model.starts_with("o3") || model.starts_with("o4") {
        200_000
    } else if model.starts_with("gpt-4-turbo") {
        128_000
    } else if model.starts_with("gpt-4") {
        8_192
    } else if model.starts_with("gpt-3.5") {
        16_385
    } else {
        32_768
    }
}
