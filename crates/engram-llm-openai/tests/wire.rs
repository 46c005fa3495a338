//! End-to-end tests against a local mock of the chat completions endpoint.

use std::sync::Arc;

use engram_llm::attachment::{Attachment, InMemoryAttachments};
use engram_llm::test_helpers::{
    assert_well_formed, collect_events, collect_results, joined_text, sample_history,
    weather_tool,
};
use engram_llm::{
    CompletionEvent, CompletionService, ImageRef, LlmError, Message, ModelOptions, ToolCall,
    complete_batch,
};
use engram_llm_openai::{OpenAiCompletions, OpenAiConfig};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse(frames: &[&str]) -> String {
    frames.iter().map(|f| format!("data: {f}\n\n")).collect()
}

fn text_frame(text: &str) -> String {
    json!({"choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]})
        .to_string()
}

async fn serve(body: String) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;
    server
}

fn service(server: &MockServer) -> OpenAiCompletions {
    OpenAiCompletions::new(OpenAiConfig {
        api_key: "sk-test".into(),
        model: "gpt-4o-mini".into(),
        base_url: format!("{}/v1", server.uri()),
        ..Default::default()
    })
}

async fn sent_body(server: &MockServer) -> Value {
    let requests = server.received_requests().await.unwrap();
    requests[0].body_json().unwrap()
}

#[tokio::test]
async fn test_text_round_trip_is_exact() {
    let pieces = ["Hyvää ", "päivää", "! ", "🌦️ ", "\"quoted\"\n", "done."];
    let frames: Vec<String> = pieces.iter().map(|p| text_frame(p)).collect();
    let mut all: Vec<&str> = frames.iter().map(String::as_str).collect();
    all.push("[DONE]");
    let server = serve(sse(&all)).await;

    let stream = service(&server)
        .complete(&sample_history(), &ModelOptions::default())
        .await
        .unwrap();
    let events = collect_events(stream).await;

    assert_well_formed(&events);
    assert_eq!(events.len(), pieces.len() + 1);
    assert_eq!(joined_text(&events), pieces.concat());

    let body = sent_body(&server).await;
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["stream"], true);
    assert_eq!(body["messages"][0]["role"], "system");
}

#[tokio::test]
async fn test_tool_call_reassembled_across_frames() {
    let body = sse(&[
        r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"c1","type":"function","function":{"name":"foo","arguments":"{\"a\":1"}}]},"finish_reason":null}]}"#,
        r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"23}"}}]},"finish_reason":null}]}"#,
        "[DONE]",
    ]);
    let server = serve(body).await;
    let options = ModelOptions {
        enabled_tools: vec![weather_tool()],
        ..Default::default()
    };

    let stream = service(&server)
        .complete(&sample_history(), &options)
        .await
        .unwrap();
    let events = collect_events(stream).await;

    assert_eq!(
        events,
        vec![
            CompletionEvent::ToolCalls {
                calls: vec![ToolCall::with_id("c1", "foo", json!({"a": 123}))],
            },
            CompletionEvent::End,
        ]
    );
    let sent = sent_body(&server).await;
    assert_eq!(sent["tools"][0]["function"]["name"], "weather_forecast");
}

#[tokio::test]
async fn test_text_then_tool_call() {
    let body = sse(&[
        text_frame("Let me check. ").as_str(),
        r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"c9","function":{"name":"weather_forecast","arguments":"{\"location\":\"Oulu\"}"}}]},"finish_reason":"tool_calls"}]}"#,
        "[DONE]",
    ]);
    let server = serve(body).await;

    let stream = service(&server)
        .complete(&sample_history(), &ModelOptions::default())
        .await
        .unwrap();
    let events = collect_events(stream).await;

    assert_well_formed(&events);
    assert_eq!(events[0], CompletionEvent::text("Let me check. "));
    let CompletionEvent::ToolCalls { calls } = &events[1] else {
        panic!("expected ToolCalls, got {:?}", events[1]);
    };
    assert_eq!(calls[0].arguments, json!({"location": "Oulu"}));
}

#[tokio::test]
async fn test_malformed_line_fails_stream_after_prior_text() {
    let body = format!("{}data: {{oops\n\n", sse(&[text_frame("partial").as_str()]));
    let server = serve(body).await;

    let stream = service(&server)
        .complete(&sample_history(), &ModelOptions::default())
        .await
        .unwrap();
    let items = collect_results(stream).await;

    assert_eq!(items.len(), 2);
    assert!(matches!(&items[0], Ok(CompletionEvent::Text { content }) if content == "partial"));
    assert!(matches!(&items[1], Err(LlmError::ResponseFormat { raw, .. }) if raw == "{oops"));
}

#[tokio::test]
async fn test_truncated_stream_is_transport_error() {
    let server = serve(sse(&[text_frame("Half an ans").as_str()])).await;

    let stream = service(&server)
        .complete(&sample_history(), &ModelOptions::default())
        .await
        .unwrap();
    let items = collect_results(stream).await;

    assert!(items.iter().all(|i| !matches!(i, Ok(CompletionEvent::End))));
    let last = items.last().unwrap();
    assert!(matches!(last, Err(e) if e.is_retryable()));
}

#[tokio::test]
async fn test_finish_reason_without_done_is_accepted() {
    let body = sse(&[
        r#"{"choices":[{"index":0,"delta":{"content":"Hi"},"finish_reason":"stop"}]}"#,
    ]);
    let server = serve(body).await;

    let answer = complete_batch(
        &service(&server),
        &sample_history(),
        &ModelOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(answer, "Hi");
}

#[tokio::test]
async fn test_unauthorized_maps_to_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
        })))
        .mount(&server)
        .await;

    let err = service(&server)
        .complete(&sample_history(), &ModelOptions::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, LlmError::Auth(ref m) if m == "Incorrect API key provided"));
}

#[tokio::test]
async fn test_rate_limit_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let err = service(&server)
        .complete(&sample_history(), &ModelOptions::default())
        .await
        .err()
        .unwrap();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_attachment_is_inlined() {
    let server = serve(sse(&[text_frame("A cat.").as_str(), "[DONE]"])).await;
    let mut store = InMemoryAttachments::new();
    store.insert(
        "img-1",
        Attachment {
            media_type: "image/jpeg".into(),
            data: vec![0xff, 0xd8, 0xff],
        },
    );
    let service = OpenAiCompletions::new(OpenAiConfig {
        api_key: "sk-test".into(),
        base_url: format!("{}/v1", server.uri()),
        attachments: Some(Arc::new(store)),
        ..Default::default()
    });
    let history = vec![
        Message::system("Describe images."),
        Message::user("What is this?").with_image(ImageRef::Attachment { id: "img-1".into() }),
    ];

    let stream = service
        .complete(&history, &ModelOptions::default())
        .await
        .unwrap();
    assert_eq!(joined_text(&collect_events(stream).await), "A cat.");

    let body = sent_body(&server).await;
    assert_eq!(
        body["messages"][1]["content"][1]["image_url"]["url"],
        "data:image/jpeg;base64,/9j/"
    );
}
