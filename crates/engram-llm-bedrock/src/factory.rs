//! Factory for building Bedrock services from configuration.

use std::sync::Arc;

use engram_llm::codec::ToolFormat;
use engram_llm::registry::{ProviderConfig, ProviderFactory};
use engram_llm::{DynCompletionService, LlmError};

use crate::{BedrockCompletions, BedrockConfig};

/// Builds [`BedrockCompletions`] from a [`ProviderConfig`].
///
/// The service is wrapped in prompted tools using the XML codec unless
/// `extra.tool_format` names another codec.
///
/// | Field | Required | Description |
/// |-------|----------|-------------|
/// | `provider` | Yes | Must be `"bedrock"` |
/// | `api_key` | Yes | Bedrock API key |
/// | `model` | Yes | Bedrock model id (e.g., `"anthropic.claude-v2:1"`) |
/// | `base_url` | No | Endpoint override |
/// | `timeout` | No | Request timeout |
/// | `extra.region` | No | AWS region (default: `us-east-1`) |
/// | `extra.style` | No | `"claude"` or `"cohere"`; inferred from the model id otherwise |
/// | `extra.max_tokens` | No | Default max tokens (default: 1000) |
/// | `extra.tool_format` | No | `"json"`, `"xml"` or `"raven"` (default: `"xml"`) |
#[derive(Debug, Clone, Copy, Default)]
pub struct BedrockFactory;

impl ProviderFactory for BedrockFactory {
    fn name(&self) -> &str {
        "bedrock"
    }

    fn build(&self, config: &ProviderConfig) -> Result<Arc<dyn DynCompletionService>, LlmError> {
        let api_key = config.require_api_key()?;
        config.require_model()?;

        let mut bedrock_config = BedrockConfig {
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.clone(),
            timeout: config.timeout,
            ..Default::default()
        };

        if let Some(region) = config.get_extra_str("region") {
            bedrock_config.region = region.to_string();
        }
        if let Some(style) = config.get_extra_str("style") {
            bedrock_config.style = Some(style.parse()?);
        }
        if let Some(max_tokens) = config.get_extra_i64("max_tokens") {
            bedrock_config.max_tokens = u32::try_from(max_tokens).map_err(|_| {
                LlmError::InvalidRequest(format!("max_tokens out of range: {max_tokens}"))
            })?;
        }
        // Fail at build time rather than on the first request.
        bedrock_config.body_style()?;

        config.apply_tool_format(
            Arc::new(BedrockCompletions::new(bedrock_config)),
            Some(ToolFormat::Xml),
        )
    }
}
