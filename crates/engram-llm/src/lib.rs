//! # engram-llm
//!
//! One streaming completion contract over many LLM backends, with tool
//! calling whether or not the backend supports it natively.
//!
//! Every backend adapter, wrapper and orchestrator implements
//! [`CompletionService`]: given a conversation history and
//! [`ModelOptions`], it yields a [`CompletionStream`] of zero or more
//! `Text` events, at most one `ToolCalls` event, and a terminal `End`.
//! Callers never need to know which backend, prompt convention or
//! composition produced the stream.
//!
//! # Adapter crates
//!
//! | Crate | Backend | Tool calls |
//! |-------|---------|------------|
//! | `engram-llm-openai` | OpenAI-compatible chat completions | native |
//! | `engram-llm-anthropic` | Anthropic Messages API | native |
//! | `engram-llm-bedrock` | AWS Bedrock (Claude, Cohere) | via [`PromptedTools`] |
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐ ┌─────────────┐ ┌───────────┐   ┌─────────┐ ┌───────────┐
//!  │  openai  │ │  anthropic  │ │  bedrock  │   │ Amalgam │ │ MultiStep │
//!  └────┬─────┘ └──────┬──────┘ └─────┬─────┘   └────┬────┘ └─────┬─────┘
//!       │              │              │ PromptedTools │            │
//!       └──────────────┴──────┬───────┴───────────────┴────────────┘
//!                             ▼
//!           ┌──────────────────────────────────────────┐
//!           │                engram-llm                │  ← you are here
//!           │ (CompletionService, codecs, registries)  │
//!           └──────────────────────────────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use engram_llm::{complete_batch, DynCompletionService, Message, ModelOptions};
//!
//! # async fn example(service: &dyn DynCompletionService) -> Result<(), engram_llm::LlmError> {
//! let history = vec![
//!     Message::system("You are a helpful assistant."),
//!     Message::user("Explain ownership in Rust"),
//! ];
//! let answer = complete_batch(service, &history, &ModelOptions::default()).await?;
//! println!("{answer}");
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`attachment`] | Resolving image attachments to inline data |
//! | [`chat`] | Messages, roles, tool calls, history validation |
//! | [`codec`] | Tool-call prompt codecs (XML, JSON, Raven) and their parsers |
//! | [`completion`] | The [`CompletionService`] trait, options, batch and tool-only modes |
//! | [`error`] | Unified [`LlmError`] |
//! | [`orchestrate`] | [`Amalgam`](orchestrate::Amalgam) and [`MultiStep`](orchestrate::MultiStep) |
//! | [`prompted`] | [`PromptedTools`], tool calling for text-only backends |
//! | [`registry`] | Provider factories and the model registry |
//! | [`sse`] | Server-sent events framing for HTTP adapters |
//! | [`stream`] | Completion events, the stream alias, wire decoding |
//! | [`tool`] | Tool descriptors, the tool registry, argument checking |
//! | [`usage`] | Model pricing and token estimation |

#![warn(missing_docs)]

pub mod attachment;
pub mod chat;
pub mod codec;
pub mod completion;
pub mod error;
pub mod orchestrate;
pub mod prompted;
pub mod registry;
pub mod sse;
pub mod stream;
pub mod tool;
pub mod usage;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_helpers;

// ── Core re-exports ────────────────────────────────────────────────
//
// Only the types that appear in nearly every program are re-exported
// at the crate root. Everything else lives in its submodule:
//
//   engram_llm::codec::*        : codecs, parsers, ToolFormat, legacy format
//   engram_llm::orchestrate::*  : Amalgam, MultiStep
//   engram_llm::registry::*     : ProviderConfig, ProviderFactory, ModelRegistry
//   engram_llm::usage::*        : ModelMetadata, TokenCounter
//   engram_llm::attachment::*   : AttachmentResolver, resolve_images
//   engram_llm::mock::*         : MockCompletionService (test-utils feature)

pub use chat::{ImageRef, Message, Part, Role, ToolCall, validate_history};
pub use completion::{
    Capability, CompletionService, DynCompletionService, ModelOptions, ProviderMetadata,
    complete_batch, complete_tool_calls,
};
pub use error::LlmError;
pub use prompted::PromptedTools;
pub use registry::{ModelRegistry, ProviderRegistry};
pub use stream::{CompletionEvent, CompletionStream};
pub use tool::{JsonSchema, ToolDescriptor, ToolRegistry};
