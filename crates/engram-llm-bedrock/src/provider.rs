//! Bedrock [`CompletionService`] implementation.

use std::collections::HashSet;

use engram_llm::completion::{CompletionService, ModelOptions, ProviderMetadata};
use engram_llm::error::{LlmError, from_status};
use engram_llm::stream::{CompletionStream, decode_body};
use engram_llm::Message;
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::instrument;

use crate::config::BedrockConfig;
use crate::prompt;
use crate::stream::BedrockDecoder;
use crate::types::ExceptionPayload;

/// Completion service for Bedrock text models over
/// `invoke-with-response-stream`.
///
/// These models have no native tool calling. Wrap the service in
/// [`PromptedTools`](engram_llm::PromptedTools) (the
/// [`BedrockFactory`](crate::BedrockFactory) does this by default) to use
/// tools.
///
/// ```rust,no_run
/// use engram_llm::{complete_batch, Message, ModelOptions};
/// use engram_llm_bedrock::{BedrockCompletions, BedrockConfig};
///
/// # async fn example() -> Result<(), engram_llm::LlmError> {
/// let service = BedrockCompletions::new(BedrockConfig {
///     api_key: std::env::var("AWS_BEARER_TOKEN_BEDROCK").unwrap_or_default(),
///     model: "anthropic.claude-v2:1".into(),
///     ..Default::default()
/// });
/// let history = vec![Message::system("Be brief."), Message::user("Hi!")];
/// let answer = complete_batch(&service, &history, &ModelOptions::default()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct BedrockCompletions {
    config: BedrockConfig,
    client: reqwest::Client,
}

impl BedrockCompletions {
    /// Creates a service from the given configuration.
    pub fn new(config: BedrockConfig) -> Self {
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
            "authorization",
            HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
                .map_err(|_| LlmError::Auth("API key contains invalid header characters".into()))?,
        );
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert(
            "accept",
            HeaderValue::from_static("application/vnd.amazon.eventstream"),
        );
        Ok(headers)
    }

    fn invoke_url(&self) -> String {
        let endpoint = self.config.endpoint();
        let base = endpoint.trim_end_matches('/');
        let model = self.config.model.replace(':', "%3A");
        format!("{base}/model/{model}/invoke-with-response-stream")
    }

    async fn send_request(
        &self,
        history: &[Message],
        options: &ModelOptions,
    ) -> Result<reqwest::Response, LlmError> {
        let body = prompt::build_body(history, options, &self.config)?;

        let response = self
            .client
            .post(self.invoke_url())
            .headers(self.default_headers()?)
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error(&e, &self.config))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let http_status = http::StatusCode::from_u16(status.as_u16())
                .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR);
            return Err(convert_error(http_status, &body));
        }

        Ok(response)
    }
}

fn transport_error(e: &reqwest::Error, config: &BedrockConfig) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout {
            elapsed_ms: config
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
}

/// Maps a non-success response. Bedrock error bodies are
/// `{"message": "..."}`; 424 signals a model-side failure worth retrying.
fn convert_error(status: http::StatusCode, body: &str) -> LlmError {
    let message = serde_json::from_str::<ExceptionPayload>(body)
        .map_or_else(|_| body.to_string(), |e| e.message);
    if status == http::StatusCode::FAILED_DEPENDENCY {
        return LlmError::Http {
            status: Some(status),
            message,
            retryable: true,
        };
    }
    from_status(status, message)
}

impl CompletionService for BedrockCompletions {
    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn complete(
        &self,
        history: &[Message],
        options: &ModelOptions,
    ) -> Result<CompletionStream, LlmError> {
        let style = self.config.body_style()?;
        let response = self.send_request(history, options).await?;
        Ok(decode_body(response.bytes_stream(), BedrockDecoder::new(style)))
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: "bedrock".into(),
            model: self.config.model.clone(),
            context_window: context_window_for_model(&self.config.model),
            capabilities: HashSet::new(),
        }
    }
}

fn context_window_for_model(model: &str) -> u64 {
    if model.contains("anthropic.claude") {
        100_000
    } else {
        4_096
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(model: &str) -> BedrockCompletions {
        BedrockCompletions::new(BedrockConfig {
            api_key: "br-test".into(),
            model: model.into(),
            ..Default::default()
        })
    }

    #[test]
    fn test_invoke_url_escapes_version_colon() {
        assert_eq!(
            service("anthropic.claude-v2:1").invoke_url(),
            "https://bedrock-runtime.us-east-1.amazonaws.com/model/anthropic.claude-v2%3A1/invoke-with-response-stream"
        );
    }

    #[test]
    fn test_metadata_has_no_native_tools() {
        let meta = service("cohere.command-text-v14").metadata();
        assert_eq!(meta.name, "bedrock");
        assert_eq!(meta.context_window, 4_096);
        assert!(meta.capabilities.is_empty());
    }

    #[test]
    fn test_default_headers() {
        let headers = service("anthropic.claude-v2").default_headers().unwrap();
        assert_eq!(headers.get("authorization").unwrap(), "Bearer br-test");
        assert_eq!(
            headers.get("accept").unwrap(),
            "application/vnd.amazon.eventstream"
        );
    }

    #[test]
    fn test_convert_error() {
        let err = convert_error(
            http::StatusCode::FORBIDDEN,
            r#"{"message":"Bearer token expired"}"#,
        );
        assert!(matches!(err, LlmError::Auth(ref m) if m == "Bearer token expired"));

        let err = convert_error(http::StatusCode::FAILED_DEPENDENCY, "model crashed");
        assert!(err.is_retryable());

        let err = convert_error(http::StatusCode::TOO_MANY_REQUESTS, r#"{"Message":"slow down"}"#);
        assert!(matches!(err, LlmError::Http { retryable: true, ref message, .. } if message == "slow down"));
    }
}
