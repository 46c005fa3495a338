//! Bedrock model body and chunk types.

use serde::{Deserialize, Serialize};

// ── Request bodies ───────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub(crate) struct ClaudeBody<'a> {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub max_tokens_to_sample: u32,
    pub stop_sequences: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CohereBody<'a> {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub max_tokens: u32,
    pub stream: bool,
    pub stop_sequences: Vec<&'a str>,
}

// ── Stream payloads ──────────────────────────────────────────────────

/// Payload of a `chunk` event; `bytes` is base64 model JSON.
#[derive(Debug, Deserialize)]
pub(crate) struct ChunkEnvelope {
    pub bytes: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ClaudeChunk {
    #[serde(default)]
    pub completion: String,
    pub stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CohereChunk {
    pub text: Option<String>,
    #[serde(default)]
    pub is_finished: bool,
    pub finish_reason: Option<String>,
}

/// Payload of exception frames and of non-2xx JSON error bodies.
#[derive(Debug, Deserialize)]
pub(crate) struct ExceptionPayload {
    #[serde(alias = "Message")]
    pub message: String,
}
