//! Factory for building `OpenAI` services from configuration.

use std::sync::Arc;

use engram_llm::registry::{ProviderConfig, ProviderFactory};
use engram_llm::{DynCompletionService, LlmError};

use crate::{OpenAiCompletions, OpenAiConfig};

/// Builds [`OpenAiCompletions`] from a [`ProviderConfig`].
///
/// ```rust
/// use engram_llm::ProviderRegistry;
/// use engram_llm_openai::OpenAiFactory;
///
/// let mut registry = ProviderRegistry::new();
/// registry.register(OpenAiFactory);
/// assert!(registry.contains("openai"));
/// ```
///
/// # Configuration
///
/// | Field | Required | Description |
/// |-------|----------|-------------|
/// | `provider` | Yes | Must be `"openai"` |
/// | `api_key` | Yes | API key |
/// | `model` | Yes | Model identifier (e.g., `"gpt-4o"`) |
/// | `base_url` | No | Any OpenAI-compatible endpoint |
/// | `timeout` | No | Request timeout |
/// | `extra.organization` | No | OpenAI organization ID |
/// | `extra.tool_format` | No | `"json"`, `"xml"` or `"raven"` to prompt for tool calls instead of using native ones |
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiFactory;

impl ProviderFactory for OpenAiFactory {
    fn name(&self) -> &str {
        "openai"
    }

    fn build(&self, config: &ProviderConfig) -> Result<Arc<dyn DynCompletionService>, LlmError> {
        let api_key = config.require_api_key()?;
        config.require_model()?;

        let mut openai_config = OpenAiConfig {
            api_key,
            model: config.model.clone(),
            timeout: config.timeout,
            ..Default::default()
        };

        if let Some(base_url) = &config.base_url {
            openai_config.base_url.clone_from(base_url);
        }

        if let Some(organization) = config.get_extra_str("organization") {
            openai_config.organization = Some(organization.to_string());
        }

        config.apply_tool_format(Arc::new(OpenAiCompletions::new(openai_config)), None)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use engram_llm::Capability;

    use super::*;

    #[test]
    fn test_factory_name() {
        assert_eq!(OpenAiFactory.name(), "openai");
    }

    #[test]
    fn test_factory_build_success() {
        let config = ProviderConfig::new("openai", "gpt-4o")
            .api_key("sk-test")
            .timeout(Duration::from_secs(30))
            .extra("organization", "org-123");

        let service = OpenAiFactory.build(&config).unwrap();
        assert_eq!(service.metadata().name, "openai");
        assert_eq!(service.metadata().model, "gpt-4o");
        assert!(service.metadata().capabilities.contains(&Capability::NativeTools));
    }

    #[test]
    fn test_factory_missing_api_key() {
        let config = ProviderConfig::new("openai", "gpt-4o");
        let err = OpenAiFactory.build(&config).err().unwrap();
        assert!(matches!(err, LlmError::InvalidRequest(_)));
    }

    #[test]
    fn test_factory_empty_model() {
        let config = ProviderConfig::new("openai", "").api_key("sk-test");
        let err = OpenAiFactory.build(&config).err().unwrap();
        assert!(matches!(err, LlmError::InvalidRequest(_)));
    }

    #[test]
    fn test_factory_prompted_tool_format() {
        let config = ProviderConfig::new("openai", "mistral-7b")
            .api_key("sk-test")
            .base_url("https://api.together.xyz/v1")
            .extra("tool_format", "raven");
        let service = OpenAiFactory.build(&config).unwrap();
        let meta = service.metadata();
        assert!(meta.capabilities.contains(&Capability::Tools));
    }

    #[test]
    fn test_factory_unknown_tool_format() {
        let config = ProviderConfig::new("openai", "gpt-4o")
            .api_key("sk-test")
            .extra("tool_format", "yaml");
        let err = OpenAiFactory.build(&config).err().unwrap();
        assert!(matches!(err, LlmError::InvalidRequest(_)));
    }
}
