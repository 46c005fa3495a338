//! Decoding of `invoke-with-response-stream` responses.
//!
//! Each event-stream frame carries a `:message-type` header:
//!
//! | `:message-type` | Meaning |
//! |-----------------|---------|
//! | `event` with `:event-type = chunk` | `{"bytes": "<base64 model JSON>"}` |
//! | `exception` | modeled service error, named by `:exception-type` |
//! | `error` | unmodeled error in `:error-code` / `:error-message` |
//!
//! The stream ends at the model chunk that reports a stop reason (Claude)
//! or `is_finished` (Cohere).

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use engram_llm::error::LlmError;
use engram_llm::stream::{CompletionEvent, WireDecoder};

use crate::config::BodyStyle;
use crate::frame::{Frame, FrameBuffer};
use crate::types::{ChunkEnvelope, ClaudeChunk, CohereChunk, ExceptionPayload};

const RETRYABLE_EXCEPTIONS: &[&str] = &[
    "throttlingException",
    "serviceUnavailableException",
    "modelStreamErrorException",
    "internalServerException",
];

/// Turns event-stream bytes into completion events.
#[derive(Debug)]
pub(crate) struct BedrockDecoder {
    frames: FrameBuffer,
    style: BodyStyle,
    done: bool,
}

impl BedrockDecoder {
    pub(crate) fn new(style: BodyStyle) -> Self {
        Self {
            frames: FrameBuffer::new(),
            style,
            done: false,
        }
    }

    fn handle_frame(&mut self, frame: &Frame) -> Result<Vec<CompletionEvent>, LlmError> {
        match frame.header_str(":message-type") {
            Some("event") => match frame.header_str(":event-type") {
                Some("chunk") => self.handle_chunk(frame),
                other => {
                    tracing::debug!(event_type = ?other, "ignoring Bedrock stream event");
                    Ok(Vec::new())
                }
            },
            Some("exception") => Err(exception(frame)),
            Some("error") => Err(LlmError::Provider {
                code: frame.header_str(":error-code").unwrap_or("error").into(),
                message: frame
                    .header_str(":error-message")
                    .unwrap_or("Bedrock stream reported an error")
                    .into(),
                retryable: false,
            }),
            other => Err(LlmError::decode(
                format!("unexpected Bedrock message type {other:?}"),
                String::from_utf8_lossy(&frame.payload),
            )),
        }
    }

    fn handle_chunk(&mut self, frame: &Frame) -> Result<Vec<CompletionEvent>, LlmError> {
        let raw = String::from_utf8_lossy(&frame.payload);
        let envelope: ChunkEnvelope = serde_json::from_slice(&frame.payload).map_err(|e| {
            tracing::warn!(raw = %raw, error = %e, "malformed Bedrock chunk");
            LlmError::decode(format!("Failed to parse Bedrock chunk: {e}"), &*raw)
        })?;
        let bytes = BASE64.decode(envelope.bytes.as_bytes()).map_err(|e| {
            LlmError::decode(format!("Bedrock chunk is not base64: {e}"), envelope.bytes.clone())
        })?;
        let body = String::from_utf8_lossy(&bytes);

        let (text, finished) = match self.style {
            BodyStyle::Claude => {
                let chunk: ClaudeChunk = parse_model_chunk(&body)?;
                if let Some(reason) = &chunk.stop_reason {
                    tracing::debug!(stop_reason = %reason, "Bedrock completion finished");
                }
                (chunk.completion, chunk.stop_reason.is_some())
            }
            BodyStyle::Cohere => {
                let chunk: CohereChunk = parse_model_chunk(&body)?;
                if let Some(reason) = &chunk.finish_reason {
                    tracing::debug!(finish_reason = %reason, "Bedrock completion finished");
                }
                (chunk.text.unwrap_or_default(), chunk.is_finished)
            }
        };

        let mut events = Vec::with_capacity(2);
        if !text.is_empty() {
            events.push(CompletionEvent::Text { content: text });
        }
        if finished {
            self.done = true;
            events.push(CompletionEvent::End);
        }
        Ok(events)
    }
}

fn parse_model_chunk<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, LlmError> {
    serde_json::from_str(body).map_err(|e| {
        tracing::warn!(raw = body, error = %e, "malformed Bedrock model chunk");
        LlmError::decode(format!("Failed to parse Bedrock model chunk: {e}"), body)
    })
}

fn exception(frame: &Frame) -> LlmError {
    let code = frame.header_str(":exception-type").unwrap_or("exception");
    let message = serde_json::from_slice::<ExceptionPayload>(&frame.payload)
        .map(|p| p.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(&frame.payload).into_owned());
    LlmError::Provider {
        code: code.into(),
        message,
        retryable: RETRYABLE_EXCEPTIONS.contains(&code),
    }
}

impl WireDecoder for BedrockDecoder {
    fn feed(&mut self, chunk: &[u8], out: &mut Vec<CompletionEvent>) -> Result<(), LlmError> {
        self.frames.extend(chunk);
        while !self.done {
            let Some(frame) = self.frames.next_frame()? else {
                break;
            };
            out.extend(self.handle_frame(&frame)?);
        }
        Ok(())
    }

    fn finish(&mut self, _out: &mut Vec<CompletionEvent>) -> Result<(), LlmError> {
        if self.done {
            return Ok(());
        }
        if !self.frames.is_empty() {
            tracing::warn!("Bedrock stream ended inside a frame");
        }
        Err(LlmError::truncated("Bedrock"))
    }
}
