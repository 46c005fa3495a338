//! Anthropic Messages API adapter for `engram-llm`.
//!
//! Implements [`CompletionService`](engram_llm::CompletionService) over the
//! streaming Messages API with native tool use. System messages become the
//! request's top-level `system` field, and consecutive turns of the same
//! role are merged as the API requires.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use engram_llm::{complete_batch, Message, ModelOptions};
//! use engram_llm_anthropic::{AnthropicCompletions, AnthropicConfig};
//!
//! # async fn example() -> Result<(), engram_llm::LlmError> {
//! let service = AnthropicCompletions::new(AnthropicConfig {
//!     api_key: std::env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
//!     ..Default::default()
//! });
//! let history = vec![
//!     Message::system("You are a helpful assistant."),
//!     Message::user("Hello!"),
//! ];
//! println!("{}", complete_batch(&service, &history, &ModelOptions::default()).await?);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod config;
mod convert;
mod factory;
mod provider;
mod stream;
mod types;

pub use config::AnthropicConfig;
pub use factory::AnthropicFactory;
pub use provider::AnthropicCompletions;
