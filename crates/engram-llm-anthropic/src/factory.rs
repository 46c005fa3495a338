//! Factory for building Anthropic services from configuration.

use std::sync::Arc;

use engram_llm::registry::{ProviderConfig, ProviderFactory};
use engram_llm::{DynCompletionService, LlmError};

use crate::{AnthropicCompletions, AnthropicConfig};

/// Builds [`AnthropicCompletions`] from a [`ProviderConfig`].
///
/// # Configuration
///
/// | Field | Required | Description |
/// |-------|----------|-------------|
/// | `provider` | Yes | Must be `"anthropic"` |
/// | `api_key` | Yes | Anthropic API key |
/// | `model` | Yes | Model identifier (e.g., `"claude-sonnet-4-20250514"`) |
/// | `base_url` | No | Custom API endpoint |
/// | `timeout` | No | Request timeout |
/// | `extra.max_tokens` | No | Default max tokens (default: 1000) |
/// | `extra.api_version` | No | API version header |
/// | `extra.tool_format` | No | Prompt-based tool format instead of native tools |
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicFactory;

impl ProviderFactory for AnthropicFactory {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn build(&self, config: &ProviderConfig) -> Result<Arc<dyn DynCompletionService>, LlmError> {
        let api_key = config.require_api_key()?;
        config.require_model()?;

        let mut anthropic_config = AnthropicConfig {
            api_key,
            model: config.model.clone(),
            timeout: config.timeout,
            ..Default::default()
        };

        if let Some(base_url) = &config.base_url {
            anthropic_config.base_url.clone_from(base_url);
        }

        if let Some(max_tokens) = config.get_extra_i64("max_tokens") {
            anthropic_config.max_tokens = u32::try_from(max_tokens).map_err(|_| {
                LlmError::InvalidRequest(format!("max_tokens out of range: {max_tokens}"))
            })?;
        }

        if let Some(version) = config.get_extra_str("api_version") {
            anthropic_config.api_version = version.to_string();
        }

        config.apply_tool_format(Arc::new(AnthropicCompletions::new(anthropic_config)), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_name() {
        assert_eq!(AnthropicFactory.name(), "anthropic");
    }

    #[test]
    fn test_factory_build_success() {
        let config = ProviderConfig::new("anthropic", "claude-3-5-haiku-latest")
            .api_key("sk-ant-test")
            .extra("max_tokens", 2048)
            .extra("api_version", "2024-01-01");

        let service = AnthropicFactory.build(&config).unwrap();
        assert_eq!(service.metadata().name, "anthropic");
        assert_eq!(service.metadata().model, "claude-3-5-haiku-latest");
    }

    #[test]
    fn test_factory_missing_api_key() {
        let config = ProviderConfig::new("anthropic", "claude-3-5-haiku-latest");
        let err = AnthropicFactory.build(&config).err().unwrap();
        assert!(matches!(err, LlmError::InvalidRequest(_)));
    }

    #[test]
    fn test_factory_negative_max_tokens() {
        let config = ProviderConfig::new("anthropic", "claude-3-5-haiku-latest")
            .api_key("sk-ant-test")
            .extra("max_tokens", -1);
        let err = AnthropicFactory.build(&config).err().unwrap();
        assert!(matches!(err, LlmError::InvalidRequest(_)));
    }
}
