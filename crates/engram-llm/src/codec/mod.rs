//! Tool prompt codecs: embedding tool calls in free-form model text.
//!
//! Backends without native function calling are told about tools through
//! the system prompt and asked to answer in a fixed notation. A
//! [`ToolPromptCodec`] owns both directions of that convention: rendering
//! tool declarations and prior calls into prompt text, and creating a
//! streaming [`ToolParser`] that pulls calls back out of the model output.
//!
//! | Format | Notation | Passthrough |
//! |--------|----------|-------------|
//! | [`XmlCodec`] | `<tool_calls><invoke>…</invoke></tool_calls>` | character by character |
//! | [`JsonCodec`] | `{"calls": [{"tool_name": …, "arguments": {…}}]}` | at end of stream |
//! | [`RavenCodec`] | `name(arg="value")`, one per line | none |
//!
//! The codec is chosen when an adapter is constructed, usually through
//! [`ToolFormat`] and [`PromptedTools`](crate::prompted::PromptedTools).

mod json;
pub mod legacy;
mod raven;
mod xml;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::ToolCall;
use crate::error::LlmError;
use crate::tool::ToolDescriptor;

pub use json::{JsonCodec, JsonToolParser};
pub use raven::{NO_OP_TOOL, RavenCodec, RavenToolParser};
pub use xml::{XmlCodec, XmlToolParser};

/// A prompt-rendering and output-parsing strategy for tool calls.
pub trait ToolPromptCodec: Send + Sync + fmt::Debug {
    /// Instructions plus the tool catalogue, for the system message.
    fn system_prompt(&self, tools: &[ToolDescriptor]) -> String;

    /// One tool's declaration in this codec's notation.
    fn tool_to_prompt(&self, tool: &ToolDescriptor) -> String;

    /// A fresh parser for one completion. `tools` are the enabled tools,
    /// used to type argument values and to name positional arguments.
    fn new_parser(&self, tools: &[ToolDescriptor]) -> Box<dyn ToolParser>;

    /// Renders one call the way the model would have written it.
    fn stringify_call(&self, call: &ToolCall) -> String;

    /// Renders a bot turn that issued `calls`, for re-insertion into history.
    fn tool_message(&self, calls: &[ToolCall]) -> String;

    /// Renders a tool result for backends without a tool role.
    fn tool_result(&self, tool: &str, output: &str) -> String {
        format!("Result of {tool}:\n{output}")
    }
}

/// Streaming, stateful, single-pass extractor of embedded tool calls.
pub trait ToolParser: Send {
    /// Feeds one chunk of model output and returns the part of it that is
    /// definitely not call content and may be shown to the user now.
    fn append(&mut self, chunk: &str) -> String;

    /// At end of stream, returns text that was held back but turned out
    /// not to be call content.
    fn flush_text(&mut self) -> String {
        String::new()
    }

    /// At end of stream, parses everything buffered as call content.
    fn parse(&mut self) -> Result<Vec<ToolCall>, LlmError>;
}

/// Names a codec, for configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolFormat {
    /// [`JsonCodec`].
    #[default]
    Json,
    /// [`XmlCodec`].
    Xml,
    /// [`RavenCodec`].
    Raven,
}

impl ToolFormat {
    /// The codec implementing this format.
    pub fn codec(self) -> Arc<dyn ToolPromptCodec> {
        match self {
            Self::Json => Arc::new(JsonCodec),
            Self::Xml => Arc::new(XmlCodec),
            Self::Raven => Arc::new(RavenCodec),
        }
    }
}

impl FromStr for ToolFormat {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "xml" => Ok(Self::Xml),
            "raven" | "python" => Ok(Self::Raven),
            other => Err(LlmError::InvalidRequest(format!(
                "unknown tool format {other:?} (expected json, xml, or raven)"
            ))),
        }
    }
}

pub(crate) fn find_tool<'a>(tools: &'a [ToolDescriptor], name: &str) -> Option<&'a ToolDescriptor> {
    tools.iter().find(|t| t.name == name)
}

/// Types a textual argument value using the tool's schema.
///
/// Non-string schema types are decoded as JSON; everything else, including
/// unknown tools and arguments, stays a string.
pub(crate) fn coerce_value(tool: Option<&ToolDescriptor>, arg: &str, raw: &str) -> Value {
    match tool.and_then(|t| t.arg_kind(arg)) {
        Some("number" | "integer" | "boolean" | "array" | "object" | "null") => {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
        }
        _ => Value::String(raw.to_owned()),
    }
}
