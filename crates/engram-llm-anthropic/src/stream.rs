//! Decoding of the Messages API SSE stream.
//!
//! | Event | Completion event |
//! |-------|------------------|
//! | `content_block_delta` / `text_delta` | `Text` |
//! | `content_block_start` (`tool_use`) | opens a call buffer |
//! | `content_block_delta` / `input_json_delta` | appended to the call buffer |
//! | `message_stop` | `ToolCalls` (if any), then `End` |
//! | `error` | [`LlmError::Provider`] |
//!
//! `ping`, `message_start`, `content_block_stop` and `message_delta` carry
//! nothing the event contract needs.

use std::collections::BTreeMap;

use engram_llm::chat::{ToolCall, generate_call_id};
use engram_llm::error::LlmError;
use engram_llm::sse::SseBuffer;
use engram_llm::stream::{CompletionEvent, WireDecoder};
use serde_json::Value;

use crate::types::{ErrorDetail, StreamResponse};

#[derive(Debug)]
struct ToolUseState {
    id: Option<String>,
    name: Option<String>,
    json_buffer: String,
}

/// Turns Messages API SSE bytes into completion events.
#[derive(Debug, Default)]
pub(crate) struct AnthropicDecoder {
    sse: SseBuffer,
    tool_states: BTreeMap<u32, ToolUseState>,
    done: bool,
}

impl AnthropicDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn handle_data(&mut self, data: &str) -> Result<Vec<CompletionEvent>, LlmError> {
        let response: StreamResponse = serde_json::from_str(data).map_err(|e| {
            tracing::warn!(raw = data, error = %e, "malformed Anthropic stream event");
            LlmError::decode(format!("Failed to parse Anthropic stream event: {e}"), data)
        })?;

        match response.event_type.as_str() {
            "content_block_start" => {
                self.handle_block_start(&response);
                Ok(response
                    .content_block
                    .and_then(|b| b.text)
                    .filter(|t| !t.is_empty())
                    .map(|content| CompletionEvent::Text { content })
                    .into_iter()
                    .collect())
            }
            "content_block_delta" => Ok(self.handle_block_delta(response).into_iter().collect()),
            "message_delta" => {
                if let Some(reason) = response.delta.and_then(|d| d.stop_reason) {
                    tracing::debug!(stop_reason = %reason, "Anthropic message finished");
                }
                Ok(Vec::new())
            }
            "message_stop" => self.terminate(),
            "error" => Err(provider_error(response.error)),
            _ => Ok(Vec::new()),
        }
    }

    fn handle_block_start(&mut self, response: &StreamResponse) {
        let (Some(index), Some(block)) = (response.index, &response.content_block) else {
            return;
        };
        if block.block_type != "tool_use" {
            return;
        }
        self.tool_states.insert(
            index,
            ToolUseState {
                id: block.id.clone().filter(|id| !id.is_empty()),
                name: block.name.clone().filter(|name| !name.is_empty()),
                json_buffer: String::new(),
            },
        );
    }

    fn handle_block_delta(&mut self, response: StreamResponse) -> Option<CompletionEvent> {
        let delta = response.delta?;
        match delta.delta_type.as_deref() {
            Some("text_delta") => delta
                .text
                .filter(|t| !t.is_empty())
                .map(|content| CompletionEvent::Text { content }),
            Some("input_json_delta") => {
                let partial = delta.partial_json?;
                if let Some(state) = response.index.and_then(|i| self.tool_states.get_mut(&i)) {
                    state.json_buffer.push_str(&partial);
                }
                None
            }
            _ => None,
        }
    }

    fn terminate(&mut self) -> Result<Vec<CompletionEvent>, LlmError> {
        self.done = true;
        let calls = std::mem::take(&mut self.tool_states)
            .into_values()
            .map(into_call)
            .collect::<Result<Vec<_>, _>>()?;

        let mut events = Vec::with_capacity(2);
        if !calls.is_empty() {
            events.push(CompletionEvent::ToolCalls { calls });
        }
        events.push(CompletionEvent::End);
        Ok(events)
    }
}

fn into_call(state: ToolUseState) -> Result<ToolCall, LlmError> {
    let Some(name) = state.name else {
        return Err(LlmError::decode(
            "tool_use block has no name",
            state.json_buffer,
        ));
    };
    let arguments: Value = if state.json_buffer.trim().is_empty() {
        Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_str(&state.json_buffer).map_err(|e| {
            LlmError::decode(
                format!("Invalid input for tool call {name}: {e}"),
                state.json_buffer.clone(),
            )
        })?
    };
    Ok(ToolCall {
        id: state.id.unwrap_or_else(generate_call_id),
        tool: name,
        arguments,
    })
}

fn provider_error(detail: Option<ErrorDetail>) -> LlmError {
    let Some(detail) = detail else {
        return LlmError::Provider {
            code: "error".into(),
            message: "Anthropic stream reported an error".into(),
            retryable: false,
        };
    };
    let retryable = matches!(detail.kind.as_str(), "overloaded_error" | "api_error");
    LlmError::Provider {
        code: detail.kind,
        message: detail.message,
        retryable,
    }
}

impl WireDecoder for AnthropicDecoder {
    fn feed(&mut self, chunk: &[u8], out: &mut Vec<CompletionEvent>) -> Result<(), LlmError> {
        for event in self.sse.push(chunk)? {
            if self.done {
                break;
            }
            out.extend(self.handle_data(&event.data)?);
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<CompletionEvent>) -> Result<(), LlmError> {
        if let Some(event) = self.sse.finish()? {
            if !self.done {
                out.extend(self.handle_data(&event.data)?);
            }
        }
        if self.done {
            Ok(())
        } else {
            Err(LlmError::truncated("Anthropic"))
        }
    }
}
