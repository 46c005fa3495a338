//! `OpenAI`-compatible adapter for `engram-llm`.
//!
//! Implements [`CompletionService`](engram_llm::CompletionService) over the
//! streaming chat completions API. Besides `OpenAI` itself, any endpoint
//! speaking the same protocol (Together, Anyscale, Mistral, Perplexity,
//! local servers) works through [`OpenAiConfig::base_url`].
//!
//! Tool calls use the API's native function calling. Argument fragments
//! are reassembled per call slot and surface as one `ToolCalls` event when
//! the stream terminates.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use engram_llm::{complete_batch, Message, ModelOptions};
//! use engram_llm_openai::{OpenAiCompletions, OpenAiConfig};
//!
//! # async fn example() -> Result<(), engram_llm::LlmError> {
//! let service = OpenAiCompletions::new(OpenAiConfig {
//!     api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
//!     ..Default::default()
//! });
//! let history = vec![
//!     Message::system("You are a helpful assistant."),
//!     Message::user("Hello!"),
//! ];
//! let answer = complete_batch(&service, &history, &ModelOptions::default()).await?;
//! println!("{answer}");
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

pub use config::OpenAiConfig;
pub use factory::OpenAiFactory;
pub use provider::OpenAiCompletions;
