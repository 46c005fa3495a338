//! AWS Bedrock adapter for `engram-llm`.
//!
//! Streams text completions from Bedrock's `invoke-with-response-stream`
//! endpoint. Two model families are supported, selected by [`BodyStyle`]:
//! Claude text completions and Cohere Command. Responses arrive as binary
//! event-stream frames whose checksums are verified before decoding.
//!
//! Requests authenticate with a Bedrock API key sent as a bearer token.
//!
//! ```rust,no_run
//! use engram_llm::registry::{ProviderConfig, ProviderRegistry};
//! use engram_llm_bedrock::BedrockFactory;
//!
//! # fn example() -> Result<(), engram_llm::LlmError> {
//! let mut providers = ProviderRegistry::new();
//! providers.register(BedrockFactory);
//! let service = providers.build(
//!     &ProviderConfig::new("bedrock", "anthropic.claude-v2:1")
//!         .api_key("bedrock-api-key")
//!         .extra("region", "us-west-2"),
//! )?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod config;
mod factory;
mod frame;
mod prompt;
mod provider;
mod stream;
mod types;

pub use config::{BedrockConfig, BodyStyle};
pub use factory::BedrockFactory;
pub use provider::BedrockCompletions;
