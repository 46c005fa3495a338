//! Conversation messages and tool calls.
//!
//! A [`Message`] is one turn of a conversation. Its [`Role`] decides which
//! of the optional fields are meaningful:
//!
//! | Role | `parts` | `tool_calls` | `call_id` / `tool` |
//! |------|---------|--------------|--------------------|
//! | `System` | prompt text | empty | `None` |
//! | `User` | text and images | empty | `None` |
//! | `Bot` | generated text (may be empty) | calls it issued | `None` |
//! | `Tool` | tool output | empty | the call it answers |
//!
//! Histories handed to [`ModelRegistry::complete`](crate::registry::ModelRegistry::complete)
//! are checked with [`validate_history`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LlmError;

/// Who authored a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions for the model; always the first message.
    System,
    /// The human side of the conversation.
    User,
    /// A previous model reply.
    Bot,
    /// The result of executing a tool call.
    Tool,
}

/// One piece of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Part {
    /// Plain text.
    Text(String),
    /// An image, either inline or by attachment reference.
    Image(ImageRef),
}

/// Where an image part's bytes come from.
///
/// Adapters only send [`Inline`](Self::Inline) images; references are
/// resolved through an [`AttachmentResolver`](crate::attachment::AttachmentResolver)
/// first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ImageRef {
    /// Base64-encoded image data.
    Inline {
        /// MIME type, e.g. `"image/png"`.
        media_type: String,
        /// Base64 payload (standard alphabet, padded).
        data: String,
    },
    /// A stored attachment, identified by its object id.
    Attachment {
        /// Attachment object id.
        id: String,
    },
}

/// A parsed request to invoke a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique per call; provider-supplied or generated locally.
    pub id: String,
    /// Name of the [`ToolDescriptor`](crate::tool::ToolDescriptor) to invoke.
    pub tool: String,
    /// Argument values, normally a JSON object keyed by argument name.
    pub arguments: Value,
}

impl ToolCall {
    /// Creates a call with a freshly generated id.
    pub fn new(tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: generate_call_id(),
            tool: tool.into(),
            arguments,
        }
    }

    /// Creates a call with a provider-supplied id.
    pub fn with_id(id: impl Into<String>, tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            tool: tool.into(),
            arguments,
        }
    }
}

/// Generates a locally unique tool-call id.
pub fn generate_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// One turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Author of the turn.
    pub role: Role,
    /// Ordered content parts.
    #[serde(default)]
    pub parts: Vec<Part>,
    /// Tool calls issued by a bot message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For tool messages, the id of the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// For tool messages, the name of the tool that produced it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}

impl Message {
    fn text_message(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part::Text(text.into())],
            tool_calls: Vec::new(),
            call_id: None,
            tool: None,
        }
    }

    /// A system prompt.
    pub fn system(text: impl Into<String>) -> Self {
        Self::text_message(Role::System, text)
    }

    /// A user turn.
    pub fn user(text: impl Into<String>) -> Self {
        Self::text_message(Role::User, text)
    }

    /// A bot reply without tool calls.
    pub fn bot(text: impl Into<String>) -> Self {
        Self::text_message(Role::Bot, text)
    }

    /// A bot reply that issued tool calls. `text` may be empty.
    pub fn bot_with_calls(text: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let text = text.into();
        Self {
            role: Role::Bot,
            parts: if text.is_empty() {
                Vec::new()
            } else {
                vec![Part::Text(text)]
            },
            tool_calls: calls,
            call_id: None,
            tool: None,
        }
    }

    /// The output of a tool call.
    pub fn tool_result(
        call_id: impl Into<String>,
        tool: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            parts: vec![Part::Text(text.into())],
            tool_calls: Vec::new(),
            call_id: Some(call_id.into()),
            tool: Some(tool.into()),
        }
    }

    /// Adds an image part.
    #[must_use]
    pub fn with_image(mut self, image: ImageRef) -> Self {
        self.parts.push(Part::Image(image));
        self
    }

    /// All text parts, concatenated.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                Part::Image(_) => None,
            })
            .collect()
    }

    /// Returns `true` if any text part is non-empty.
    pub fn has_text(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, Part::Text(t) if !t.is_empty()))
    }

    /// Iterates over the image parts.
    pub fn images(&self) -> impl Iterator<Item = &ImageRef> {
        self.parts.iter().filter_map(|p| match p {
            Part::Image(image) => Some(image),
            Part::Text(_) => None,
        })
    }

    /// Appends `text` to the last text part, adding one if there is none.
    pub fn append_text(&mut self, text: &str) {
        if let Some(Part::Text(last)) = self
            .parts
            .iter_mut()
            .rev()
            .find(|p| matches!(p, Part::Text(_)))
        {
            last.push_str(text);
        } else {
            self.parts.push(Part::Text(text.to_owned()));
        }
    }
}

/// Checks the structural invariants of a conversation history.
///
/// - the history is non-empty and starts with a system message;
/// - no other message is a system message;
/// - every tool message answers a call issued by an earlier bot message
///   that has not been answered yet.
pub fn validate_history(history: &[Message]) -> Result<(), LlmError> {
    let Some(first) = history.first() else {
        return Err(LlmError::InvalidRequest("history is empty".into()));
    };
    if first.role != Role::System {
        return Err(LlmError::InvalidRequest(
            "history must start with a system message".into(),
        ));
    }

    let mut pending: HashSet<&str> = HashSet::new();
    for (index, msg) in history.iter().enumerate().skip(1) {
        match msg.role {
            Role::System => {
                return Err(LlmError::InvalidRequest(format!(
                    "unexpected system message at position {index}"
                )));
            }
            Role::Bot => pending.extend(msg.tool_calls.iter().map(|c| c.id.as_str())),
            Role::Tool => {
                let call_id = msg.call_id.as_deref().ok_or_else(|| {
                    LlmError::InvalidRequest(format!("tool message at position {index} has no call id"))
                })?;
                if !pending.remove(call_id) {
                    return Err(LlmError::InvalidRequest(format!(
                        "tool message at position {index} answers unknown call {call_id}"
                    )));
                }
            }
            Role::User => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn weather_call(id: &str) -> ToolCall {
        ToolCall::with_id(id, "weather_forecast", json!({"location": "Oulu"}))
    }

    #[test]
    fn test_text_concatenates_parts() {
        let mut msg =
            Message::user("look at ").with_image(ImageRef::Attachment { id: "a1".into() });
        msg.parts.push(Part::Text("this".into()));
        assert_eq!(msg.text(), "look at this");
        assert_eq!(msg.images().count(), 1);
    }

    #[test]
    fn test_append_text_extends_last_text_part() {
        let mut msg = Message::user("What's the weather?");
        msg.append_text("\n---\nCategory:");
        assert_eq!(msg.parts.len(), 1);
        assert_eq!(msg.text(), "What's the weather?\n---\nCategory:");
    }

    #[test]
    fn test_append_text_to_textless_message() {
        let mut msg = Message::bot_with_calls("", vec![weather_call("c1")]);
        assert!(!msg.has_text());
        msg.append_text("hello");
        assert_eq!(msg.text(), "hello");
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = ToolCall::new("t", json!({}));
        let b = ToolCall::new("t", json!({}));
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("call_"));
    }

    #[test]
    fn test_validate_accepts_tool_round_trip() {
        let history = vec![
            Message::system("You are an assistant."),
            Message::user("Weather in Oulu?"),
            Message::bot_with_calls("", vec![weather_call("c1")]),
            Message::tool_result("c1", "weather_forecast", "-3C, snow"),
        ];
        assert!(validate_history(&history).is_ok());
    }

    #[test]
    fn test_validate_accepts_uncompleted_earlier_call() {
        let history = vec![
            Message::system("s"),
            Message::bot_with_calls("", vec![weather_call("c1")]),
            Message::user("and?"),
            Message::tool_result("c1", "weather_forecast", "sunny"),
        ];
        assert!(validate_history(&history).is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_system() {
        let err = validate_history(&[Message::user("hi")]).unwrap_err();
        assert!(matches!(err, LlmError::InvalidRequest(_)));
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(validate_history(&[]).is_err());
    }

    #[test]
    fn test_validate_rejects_second_system() {
        let history = vec![Message::system("a"), Message::system("b")];
        assert!(validate_history(&history).is_err());
    }

    #[test]
    fn test_validate_rejects_orphan_tool_message() {
        let history = vec![
            Message::system("s"),
            Message::user("hi"),
            Message::tool_result("c9", "weather_forecast", "?"),
        ];
        let err = validate_history(&history).unwrap_err();
        assert!(err.to_string().contains("c9"));
    }

    #[test]
    fn test_validate_rejects_double_answer() {
        let history = vec![
            Message::system("s"),
            Message::bot_with_calls("", vec![weather_call("c1")]),
            Message::tool_result("c1", "weather_forecast", "a"),
            Message::tool_result("c1", "weather_forecast", "b"),
        ];
        assert!(validate_history(&history).is_err());
    }

    #[test]
    fn test_message_serde_shape() {
        let msg = Message::tool_result("c1", "weather_forecast", "ok");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["call_id"], "c1");
        assert!(value.get("tool_calls").is_none());
        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
    }
}
