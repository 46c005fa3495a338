//! Decoding of the chat completions SSE stream.
//!
//! # Event mapping
//!
//! | Wire data | Completion event |
//! |-----------|------------------|
//! | `choices[0].delta.content` | `Text` (emitted immediately) |
//! | `choices[0].delta.tool_calls[*]` | buffered per `index` slot |
//! | `[DONE]` | `ToolCalls` (if any slot was opened), then `End` |
//! | `{"error": ...}` | [`LlmError::Provider`] |
//!
//! A tool call's `id` and `name` only arrive in the first delta of its
//! slot; later deltas carry argument fragments. Arguments are parsed when
//! the stream terminates, and a call whose arguments do not parse fails
//! the whole event.
//!
//! If the body closes without `[DONE]` but a `finish_reason` was seen,
//! the stream still ends normally. Without either, it is a truncation.

use std::collections::BTreeMap;

use engram_llm::chat::{ToolCall, generate_call_id};
use engram_llm::error::LlmError;
use engram_llm::sse::SseBuffer;
use engram_llm::stream::{CompletionEvent, WireDecoder};
use serde_json::Value;

use crate::types::{StreamChunk, StreamToolCall};

/// Accumulates one streamed tool call.
#[derive(Debug, Default)]
struct ToolCallState {
    id: Option<String>,
    name: Option<String>,
    arguments_buffer: String,
}

/// Turns chat completions SSE bytes into completion events.
#[derive(Debug, Default)]
pub(crate) struct OpenAiDecoder {
    sse: SseBuffer,
    slots: BTreeMap<u32, ToolCallState>,
    finish_reason: Option<String>,
    done: bool,
}

impl OpenAiDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn handle_data(&mut self, data: &str) -> Result<Vec<CompletionEvent>, LlmError> {
        if data.trim() == "[DONE]" {
            return self.terminate();
        }

        let chunk: StreamChunk = serde_json::from_str(data).map_err(|e| {
            tracing::warn!(raw = data, error = %e, "malformed OpenAI stream chunk");
            LlmError::decode(format!("Failed to parse OpenAI stream chunk: {e}"), data)
        })?;

        if let Some(error) = chunk.error {
            return Err(LlmError::Provider {
                code: error.kind.unwrap_or_else(|| "error".into()),
                message: error.message,
                retryable: false,
            });
        }

        let mut events = Vec::new();
        for choice in chunk.choices {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                events.push(CompletionEvent::Text { content: text });
            }
            for delta in choice.delta.tool_calls.into_iter().flatten() {
                self.accumulate(delta);
            }
            if let Some(reason) = choice.finish_reason {
                tracing::debug!(finish_reason = %reason, "OpenAI stream finished");
                self.finish_reason = Some(reason);
            }
        }
        Ok(events)
    }

    fn accumulate(&mut self, delta: StreamToolCall) {
        let slot = self.slots.entry(delta.index).or_default();
        if let Some(id) = delta.id {
            slot.id = Some(id);
        }
        if let Some(function) = delta.function {
            if let Some(name) = function.name {
                slot.name = Some(name);
            }
            if let Some(arguments) = function.arguments {
                slot.arguments_buffer.push_str(&arguments);
            }
        }
    }

    /// Materializes buffered calls and ends the stream.
    fn terminate(&mut self) -> Result<Vec<CompletionEvent>, LlmError> {
        self.done = true;
        let calls = std::mem::take(&mut self.slots)
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

fn into_call(state: ToolCallState) -> Result<ToolCall, LlmError> {
    let Some(name) = state.name else {
        return Err(LlmError::decode(
            "streamed tool call has no function name",
            state.arguments_buffer,
        ));
    };
    let arguments: Value = if state.arguments_buffer.trim().is_empty() {
        Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_str(&state.arguments_buffer).map_err(|e| {
            LlmError::decode(
                format!("Invalid arguments for tool call {name}: {e}"),
                state.arguments_buffer.clone(),
            )
        })?
    };
    Ok(ToolCall {
        id: state.id.unwrap_or_else(generate_call_id),
        tool: name,
        arguments,
    })
}

impl WireDecoder for OpenAiDecoder {
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
            return Ok(());
        }
        if self.finish_reason.is_some() {
            // Some compatible servers close right after the finish_reason.
            out.extend(self.terminate()?);
            return Ok(());
        }
        Err(LlmError::truncated("OpenAI"))
    }
}
