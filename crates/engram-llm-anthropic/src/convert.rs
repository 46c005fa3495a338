//! Conversion from `engram-llm` types to Messages API wire types.

use engram_llm::chat::{ImageRef, Message as CoreMessage, Part, Role};
use engram_llm::error::{LlmError, from_status};
use engram_llm::ModelOptions;

use crate::config::AnthropicConfig;
use crate::types::{ContentBlock, ErrorResponse, ImageSource, Message, Request, Tool};

// ── Request conversion ───────────────────────────────────────────────

/// Builds a streaming request body.
///
/// System messages move to the top-level `system` field. Consecutive turns
/// with the same role are merged, since the API requires alternation;
/// tool results therefore travel as `tool_result` blocks in a user turn.
pub(crate) fn build_request<'a>(
    history: &[CoreMessage],
    options: &'a ModelOptions,
    config: &'a AnthropicConfig,
) -> Result<Request<'a>, LlmError> {
    let mut system: Vec<String> = history
        .iter()
        .filter(|m| m.role == Role::System)
        .map(CoreMessage::text)
        .filter(|t| !t.is_empty())
        .collect();
    if let Some(schema) = &options.structured_output {
        system.push(schema.prompt_instruction());
    }

    let mut messages: Vec<Message> = Vec::with_capacity(history.len());
    for msg in history.iter().filter(|m| m.role != Role::System) {
        let (role, content) = convert_message(msg)?;
        if content.is_empty() {
            continue;
        }
        match messages.last_mut() {
            Some(last) if last.role == role => last.content.extend(content),
            _ => messages.push(Message { role, content }),
        }
    }

    let tools = options.has_tools().then(|| {
        options
            .enabled_tools
            .iter()
            .map(|t| Tool {
                name: &t.name,
                description: &t.description,
                input_schema: t.args.as_value(),
            })
            .collect()
    });

    Ok(Request {
        model: &config.model,
        messages,
        max_tokens: options.max_tokens.unwrap_or(config.max_tokens),
        stream: true,
        temperature: options.temperature,
        system: (!system.is_empty()).then(|| system.join("\n\n")),
        stop_sequences: (!options.stop.is_empty()).then_some(options.stop.as_slice()),
        tools,
    })
}

fn convert_message(msg: &CoreMessage) -> Result<(&'static str, Vec<ContentBlock>), LlmError> {
    match msg.role {
        Role::User | Role::System => Ok(("user", convert_parts(&msg.parts)?)),
        Role::Bot => {
            let mut content = convert_parts(&msg.parts)?;
            content.extend(msg.tool_calls.iter().map(|call| ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.tool.clone(),
                input: call.arguments.clone(),
            }));
            Ok(("assistant", content))
        }
        Role::Tool => {
            let tool_use_id = msg.call_id.clone().ok_or_else(|| {
                LlmError::InvalidRequest("tool message has no call id".into())
            })?;
            Ok((
                "user",
                vec![ContentBlock::ToolResult {
                    tool_use_id,
                    content: msg.text(),
                }],
            ))
        }
    }
}

fn convert_parts(parts: &[Part]) -> Result<Vec<ContentBlock>, LlmError> {
    parts
        .iter()
        // The API rejects empty text blocks.
        .filter(|p| !matches!(p, Part::Text(t) if t.is_empty()))
        .map(|part| match part {
            Part::Text(text) => Ok(ContentBlock::Text { text: text.clone() }),
            Part::Image(ImageRef::Inline { media_type, data }) => Ok(ContentBlock::Image {
                source: ImageSource {
                    source_type: "base64",
                    media_type: media_type.clone(),
                    data: data.clone(),
                },
            }),
            Part::Image(ImageRef::Attachment { id }) => Err(LlmError::InvalidRequest(format!(
                "attachment {id} was not resolved before sending"
            ))),
        })
        .collect()
}

// ── Error conversion ─────────────────────────────────────────────────

/// Maps a non-success response to an [`LlmError`].
///
/// Status 529 ("overloaded") is Anthropic-specific and retryable.
pub(crate) fn convert_error(status: http::StatusCode, body: &str) -> LlmError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map_or_else(|_| body.to_string(), |e| e.error.message);

    if status.as_u16() == 529 {
        return LlmError::Http {
            status: Some(status),
            message,
            retryable: true,
        };
    }
    from_status(status, message)
}
