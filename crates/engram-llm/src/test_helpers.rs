//! Pre-built helpers for testing code built on `engram-llm`.
//!
//! Available with the `test-utils` feature so adapter crates and
//! downstream users can reuse them; always compiled for this crate's own
//! tests. Provides stream collectors, a contract assertion, sample
//! histories and tools, and mock shorthands.

use futures::StreamExt;
use serde_json::json;

use crate::chat::Message;
use crate::error::LlmError;
use crate::mock::MockCompletionService;
use crate::stream::{CompletionEvent, CompletionStream, check_sequence};
use crate::tool::{JsonSchema, ToolDescriptor};

/// Collects stream items, errors included.
pub async fn collect_results(stream: CompletionStream) -> Vec<Result<CompletionEvent, LlmError>> {
    stream.collect::<Vec<_>>().await
}

/// Collects stream events, panicking on any error.
///
/// Use [`collect_results`] when testing failure paths.
pub async fn collect_events(stream: CompletionStream) -> Vec<CompletionEvent> {
    stream
        .map(|item| item.expect("unexpected stream error"))
        .collect()
        .await
}

/// Concatenates every `Text` event.
pub fn joined_text(events: &[CompletionEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            CompletionEvent::Text { content } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

/// Panics unless `events` is `Text*`, at most one `ToolCalls`, then `End`.
pub fn assert_well_formed(events: &[CompletionEvent]) {
    if let Err(e) = check_sequence(events) {
        panic!("malformed completion {events:?}: {e}");
    }
}

/// A system prompt plus one user question.
pub fn sample_history() -> Vec<Message> {
    vec![
        Message::system("You are an assistant."),
        Message::user("What's the weather in Oulu?"),
    ]
}

/// A weather tool with one string argument, `location`.
pub fn weather_tool() -> ToolDescriptor {
    ToolDescriptor::new(
        "weather_forecast",
        "Retrieves the current weather and 5-day weather forecast for given location.",
        JsonSchema::new(json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "Location, e.g. a city or municipality name."
                }
            },
            "required": ["location"],
            "additionalProperties": false
        })),
    )
    .purpose("Provide weather forecasts")
    .result("A weather forecast, including current weather.")
    .guidance("Use weather_forecast when asked about current or near-future weather")
}

/// A unit-conversion tool mixing string and number arguments.
pub fn convert_tool() -> ToolDescriptor {
    ToolDescriptor::new(
        "convert_units",
        "Converts a quantity between units.",
        JsonSchema::new(json!({
            "type": "object",
            "properties": {
                "amount": {"type": "number", "description": "Quantity to convert"},
                "from": {"type": "string", "description": "Source unit"},
                "to": {"type": "string", "description": "Target unit"}
            },
            "required": ["amount", "from", "to"]
        })),
    )
    .purpose("Convert units")
    .result("The converted quantity.")
}

/// A mock that answers its first call with the given text chunks.
pub fn mock_text(chunks: &[&str]) -> MockCompletionService {
    let mock = MockCompletionService::new();
    mock.queue_text(chunks);
    mock
}
