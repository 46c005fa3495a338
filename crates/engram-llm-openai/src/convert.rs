//! Conversion from `engram-llm` types to chat completions wire types.

use engram_llm::chat::{ImageRef, Message as CoreMessage, Part, Role};
use engram_llm::error::{LlmError, from_status};
use engram_llm::ModelOptions;

use crate::config::OpenAiConfig;
use crate::types::{
    ContentPart, ErrorResponse, FunctionCallRequest, FunctionDef, ImageUrl, JsonSchemaFormat,
    Message, MessageContent, Request, ResponseFormat, Tool, ToolCallRequest,
};

// ── Request conversion ───────────────────────────────────────────────

/// Builds a streaming request body.
///
/// `history` must already have its attachment references resolved.
pub(crate) fn build_request<'a>(
    history: &[CoreMessage],
    options: &'a ModelOptions,
    config: &'a OpenAiConfig,
) -> Result<Request<'a>, LlmError> {
    let messages = history
        .iter()
        .map(convert_message)
        .collect::<Result<Vec<_>, _>>()?;

    let tools = options.has_tools().then(|| {
        options
            .enabled_tools
            .iter()
            .map(|t| Tool {
                tool_type: "function",
                function: FunctionDef {
                    name: &t.name,
                    description: &t.description,
                    parameters: t.args.as_value(),
                },
            })
            .collect()
    });

    let response_format = options
        .structured_output
        .as_ref()
        .map(|schema| ResponseFormat {
            format_type: "json_schema",
            json_schema: JsonSchemaFormat {
                name: "output",
                schema: schema.as_value(),
                strict: true,
            },
        });

    Ok(Request {
        model: &config.model,
        messages,
        stream: true,
        temperature: options.temperature,
        max_tokens: options.max_tokens,
        stop: (!options.stop.is_empty()).then_some(options.stop.as_slice()),
        tools,
        response_format,
    })
}

fn convert_message(msg: &CoreMessage) -> Result<Message, LlmError> {
    let message = match msg.role {
        Role::System => text_message("system", msg.text()),
        Role::User => Message {
            role: "user",
            content: Some(convert_user_content(&msg.parts)?),
            tool_calls: None,
            tool_call_id: None,
        },
        Role::Bot => {
            let tool_calls: Vec<_> = msg
                .tool_calls
                .iter()
                .map(|call| ToolCallRequest {
                    id: call.id.clone(),
                    call_type: "function",
                    function: FunctionCallRequest {
                        name: call.tool.clone(),
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect();
            Message {
                role: "assistant",
                content: (msg.has_text() || tool_calls.is_empty())
                    .then(|| MessageContent::Text(msg.text())),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
            }
        }
        Role::Tool => Message {
            role: "tool",
            content: Some(MessageContent::Text(msg.text())),
            tool_calls: None,
            tool_call_id: msg.call_id.clone(),
        },
    };
    Ok(message)
}

fn text_message(role: &'static str, text: String) -> Message {
    Message {
        role,
        content: Some(MessageContent::Text(text)),
        tool_calls: None,
        tool_call_id: None,
    }
}

fn convert_user_content(parts: &[Part]) -> Result<MessageContent, LlmError> {
    // A lone text part uses the plain string form.
    if let [Part::Text(text)] = parts {
        return Ok(MessageContent::Text(text.clone()));
    }

    parts
        .iter()
        .map(|part| match part {
            Part::Text(text) => Ok(ContentPart::Text { text: text.clone() }),
            Part::Image(ImageRef::Inline { media_type, data }) => Ok(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:{media_type};base64,{data}"),
                },
            }),
            Part::Image(ImageRef::Attachment { id }) => Err(LlmError::InvalidRequest(format!(
                "attachment {id} was not resolved before sending"
            ))),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(MessageContent::Parts)
}

// ── Error conversion ─────────────────────────────────────────────────

/// Maps a non-success response to an [`LlmError`], preferring the
/// message from an `{"error": {"message": ...}}` body.
pub(crate) fn convert_error(status: http::StatusCode, body: &str) -> LlmError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map_or_else(|_| body.to_string(), |e| e.error.message);
    from_status(status, message)
}
