//! Orchestrators served through a model registry, with scripted backends.

use std::sync::Arc;

use engram_llm::codec::ToolFormat;
use engram_llm::mock::MockCompletionService;
use engram_llm::orchestrate::{Amalgam, MultiStep};
use engram_llm::test_helpers::{sample_history, weather_tool};
use engram_llm::usage::{ModelMetadata, SimpleTokenCounter};
use engram_llm::{
    CompletionEvent, DynCompletionService, LlmError, Message, ModelOptions, ModelRegistry,
    PromptedTools,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn tool_options() -> ModelOptions {
    ModelOptions {
        enabled_tools: vec![weather_tool()],
        ..Default::default()
    }
}

fn registry_with(id: &str, service: Arc<dyn DynCompletionService>) -> ModelRegistry {
    let mut registry = ModelRegistry::new();
    registry.register(
        id,
        service,
        Arc::new(SimpleTokenCounter::default()),
        ModelMetadata {
            max_tokens: 8192,
            ..Default::default()
        },
    );
    registry
}

#[tokio::test]
async fn test_amalgam_with_xml_tool_model() {
    init_logging();
    let chat = Arc::new(MockCompletionService::new());
    let _dropped = chat.queue_stall(vec![CompletionEvent::text("Let me see")]);
    let tool_backend = Arc::new(MockCompletionService::new());
    tool_backend.queue_text(&[
        "<tool_calls>\n<invoke>\n<tool_name>weather_forecast</tool_name>\n",
        "<parameters>\n<location>Oulu</location>\n</parameters>\n</invoke>\n</tool_calls>",
    ]);
    let tool = Arc::new(PromptedTools::new(tool_backend.clone(), ToolFormat::Xml.codec()));
    let registry = registry_with("amalgam", Arc::new(Amalgam::new(chat, tool)));

    let calls = registry
        .tool_calls("amalgam", &sample_history(), &tool_options())
        .await
        .unwrap();

    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].tool, "weather_forecast");
    assert_eq!(calls[0].arguments, json!({"location": "Oulu"}));
    let sent_system = tool_backend.recorded_calls()[0].history[0].text();
    assert!(sent_system.contains("<tool_name>weather_forecast</tool_name>"));
}

#[tokio::test]
async fn test_amalgam_without_calls_answers_in_batch() {
    init_logging();
    let chat = Arc::new(MockCompletionService::new());
    chat.queue_text(&["Sunny ", "all week."]);
    let tool = Arc::new(MockCompletionService::new());
    tool.queue_events(vec![CompletionEvent::End]);
    let registry = registry_with("amalgam", Arc::new(Amalgam::new(chat, tool)));

    let answer = registry
        .batch("amalgam", &sample_history(), &tool_options())
        .await
        .unwrap();
    assert_eq!(answer, "Sunny all week.");
}

#[tokio::test]
async fn test_multi_step_question_needing_tools() {
    init_logging();
    let classifier = Arc::new(MockCompletionService::new());
    classifier.queue_text(&["QUESTION"]);
    classifier.queue_text(&["YES"]);
    let tool = Arc::new(MockCompletionService::new());
    tool.queue_text(&[r#"{"calls":[{"tool_name":"weather_forecast","arguments":{"location":"Oulu"}}]}"#]);
    let chat = Arc::new(MockCompletionService::new());
    let pipeline = MultiStep::new(classifier.clone(), tool.clone(), chat.clone());
    let registry = registry_with("multi", Arc::new(pipeline));

    let mut stream = registry
        .complete("multi", &sample_history(), &tool_options())
        .await
        .unwrap();
    let mut events = Vec::new();
    while let Some(event) = futures::StreamExt::next(&mut stream).await {
        events.push(event.unwrap());
    }

    assert_eq!(events.len(), 2);
    let CompletionEvent::ToolCalls { calls } = &events[0] else {
        panic!("expected ToolCalls, got {:?}", events[0]);
    };
    assert_eq!(calls[0].arguments, json!({"location": "Oulu"}));
    assert_eq!(events[1], CompletionEvent::End);
    assert_eq!(classifier.call_count(), 2);
    assert_eq!(tool.call_count(), 1);
    assert_eq!(chat.call_count(), 0);
}

#[tokio::test]
async fn test_registry_rejects_bad_history_before_calling() {
    init_logging();
    let chat = Arc::new(MockCompletionService::new());
    let registry = registry_with("chat", chat.clone());

    let err = registry
        .batch("chat", &[Message::user("No system prompt")], &ModelOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::InvalidRequest(_)));

    let err = registry
        .batch("missing", &sample_history(), &ModelOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::UnknownModel(ref id) if id == "missing"));
    assert_eq!(chat.call_count(), 0);
}
