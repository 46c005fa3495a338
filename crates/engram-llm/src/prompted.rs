//! Prompt-based tool calling for backends without native function calls.
//!
//! [`PromptedTools`] wraps any completion service. When tools are enabled
//! it:
//!
//! 1. appends the codec's tool instructions to the system message,
//! 2. rewrites earlier tool traffic into plain text the backend accepts,
//! 3. forwards the request with tools stripped from the options, and
//! 4. runs the backend's text through a [`ToolParser`], so prose streams
//!    to the caller while embedded calls surface as one `ToolCalls` event
//!    just before `End`.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::StreamExt;
use tracing::instrument;

use crate::chat::{Message, Role, ToolCall};
use crate::codec::{ToolParser, ToolPromptCodec};
use crate::completion::{
    Capability, CompletionService, DynCompletionService, ModelOptions, ProviderMetadata,
};
use crate::error::LlmError;
use crate::stream::{CompletionEvent, CompletionStream};
use crate::tool::ToolDescriptor;

/// A completion service that emulates tool calling through a prompt codec.
#[derive(Clone)]
pub struct PromptedTools {
    inner: Arc<dyn DynCompletionService>,
    codec: Arc<dyn ToolPromptCodec>,
}

impl std::fmt::Debug for PromptedTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptedTools")
            .field("inner", &self.inner.metadata())
            .field("codec", &self.codec)
            .finish()
    }
}

impl PromptedTools {
    /// Wraps `inner`, encoding tool use with `codec`.
    pub fn new(inner: Arc<dyn DynCompletionService>, codec: Arc<dyn ToolPromptCodec>) -> Self {
        Self { inner, codec }
    }

    /// Rewrites `history` for a backend that only understands text turns.
    fn render_history(&self, history: &[Message], tools: &[ToolDescriptor]) -> Vec<Message> {
        let mut out = Vec::with_capacity(history.len() + 1);
        for msg in history {
            match msg.role {
                Role::Bot if !msg.tool_calls.is_empty() => {
                    let mut rendered = Message {
                        tool_calls: Vec::new(),
                        ..msg.clone()
                    };
                    if rendered.has_text() {
                        rendered.append_text("\n\n");
                    }
                    rendered.append_text(&self.codec.tool_message(&msg.tool_calls));
                    out.push(rendered);
                }
                Role::Tool => {
                    let tool = msg.tool.as_deref().unwrap_or("tool");
                    out.push(Message::user(self.codec.tool_result(tool, &msg.text())));
                }
                _ => out.push(msg.clone()),
            }
        }

        if !tools.is_empty() {
            let prompt = self.codec.system_prompt(tools);
            match out.first_mut() {
                Some(first) if first.role == Role::System => {
                    first.append_text("\n\n");
                    first.append_text(&prompt);
                }
                _ => out.insert(0, Message::system(prompt)),
            }
        }
        out
    }
}

impl CompletionService for PromptedTools {
    #[instrument(skip_all, fields(tools = options.enabled_tools.len()))]
    async fn complete(
        &self,
        history: &[Message],
        options: &ModelOptions,
    ) -> Result<CompletionStream, LlmError> {
        let rendered = self.render_history(history, &options.enabled_tools);
        let inner_options = options.without_tools();
        let stream = self.inner.complete_boxed(&rendered, &inner_options).await?;
        if !options.has_tools() {
            return Ok(stream);
        }
        let parser = self.codec.new_parser(&options.enabled_tools);
        Ok(extract_calls(stream, parser))
    }

    fn metadata(&self) -> ProviderMetadata {
        let mut meta = self.inner.metadata();
        meta.capabilities.insert(Capability::Tools);
        meta
    }
}

struct Extraction {
    inner: CompletionStream,
    parser: Box<dyn ToolParser>,
    /// Calls the inner service produced itself.
    native: Vec<ToolCall>,
    pending: VecDeque<Result<CompletionEvent, LlmError>>,
    done: bool,
}

impl Extraction {
    fn finish(&mut self) {
        self.done = true;
        let rest = self.parser.flush_text();
        if !rest.is_empty() {
            self.pending.push_back(Ok(CompletionEvent::Text { content: rest }));
        }
        match self.parser.parse() {
            Ok(mut calls) => {
                calls.append(&mut self.native);
                if !calls.is_empty() {
                    tracing::debug!(calls = calls.len(), "extracted tool calls from text");
                    self.pending.push_back(Ok(CompletionEvent::ToolCalls { calls }));
                }
                self.pending.push_back(Ok(CompletionEvent::End));
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not parse tool calls from model output");
                self.pending.push_back(Err(e));
            }
        }
    }
}

fn extract_calls(inner: CompletionStream, parser: Box<dyn ToolParser>) -> CompletionStream {
    let state = Extraction {
        inner,
        parser,
        native: Vec::new(),
        pending: VecDeque::new(),
        done: false,
    };
    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.inner.next().await {
                Some(Ok(CompletionEvent::Text { content })) => {
                    let visible = state.parser.append(&content);
                    if !visible.is_empty() {
                        state
                            .pending
                            .push_back(Ok(CompletionEvent::Text { content: visible }));
                    }
                }
                Some(Ok(CompletionEvent::ToolCalls { calls })) => state.native.extend(calls),
                Some(Ok(CompletionEvent::End)) => state.finish(),
                Some(Err(e)) => {
                    state.done = true;
                    state.pending.push_back(Err(e));
                }
                None => {
                    state.done = true;
                    state.pending.push_back(Err(LlmError::Contract(
                        "inner completion ended without End".into(),
                    )));
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::codec::{ToolFormat, XmlCodec};
    use crate::mock::{MockCompletionService, MockError};
    use crate::test_helpers::{
        assert_well_formed, collect_events, collect_results, joined_text, sample_history,
        weather_tool,
    };

    fn wrap(mock: &Arc<MockCompletionService>, format: ToolFormat) -> PromptedTools {
        PromptedTools::new(mock.clone(), format.codec())
    }

    fn tool_options() -> ModelOptions {
        ModelOptions {
            enabled_tools: vec![weather_tool()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_xml_calls_are_extracted_and_prose_streams() {
        let mock = Arc::new(MockCompletionService::new());
        mock.queue_text(&[
            "Checking.",
            "<tool_ca",
            "lls><invoke><tool_name>weather_forecast</tool_name>",
            "<parameters><location>Oulu</location></parameters></invoke></tool_calls>",
        ]);
        let service = wrap(&mock, ToolFormat::Xml);
        let stream = service.complete(&sample_history(), &tool_options()).await.unwrap();
        let events = collect_events(stream).await;

        assert_well_formed(&events);
        assert_eq!(events[0], CompletionEvent::text("Checking."));
        assert_eq!(joined_text(&events), "Checking.");
        match &events[events.len() - 2] {
            CompletionEvent::ToolCalls { calls } => {
                assert_eq!(calls[0].tool, "weather_forecast");
                assert_eq!(calls[0].arguments, json!({"location": "Oulu"}));
            }
            other => panic!("expected ToolCalls, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_request_is_rewritten_for_the_backend() {
        let mock = Arc::new(MockCompletionService::new());
        mock.queue_text(&["ok"]);
        let service = wrap(&mock, ToolFormat::Xml);

        let call = ToolCall::with_id("c1", "weather_forecast", json!({"location": "Oulu"}));
        let mut history = sample_history();
        history.push(Message::bot_with_calls("", vec![call]));
        history.push(Message::tool_result("c1", "weather_forecast", "Sunny, 21C"));

        let _ = service.complete(&history, &tool_options()).await.unwrap();
        let calls = mock.recorded_calls();
        let recorded = &calls[0];

        assert!(recorded.options.enabled_tools.is_empty());
        assert_eq!(recorded.history.len(), 4);
        let system = recorded.history[0].text();
        assert!(system.starts_with("You are an assistant.\n\n"));
        assert!(system.contains(&XmlCodec.tool_to_prompt(&weather_tool())));

        let bot = &recorded.history[2];
        assert!(bot.tool_calls.is_empty());
        assert!(bot.text().starts_with("<tool_calls>"));

        let tool = &recorded.history[3];
        assert_eq!(tool.role, Role::User);
        assert_eq!(tool.text(), "Result of weather_forecast:\nSunny, 21C");
    }

    #[tokio::test]
    async fn test_missing_system_message_is_inserted() {
        let mock = Arc::new(MockCompletionService::new());
        mock.queue_text(&["ok"]);
        let service = wrap(&mock, ToolFormat::Json);
        let _ = service
            .complete(&[Message::user("hi")], &tool_options())
            .await
            .unwrap();
        let calls = mock.recorded_calls();
        let recorded = &calls[0];
        assert_eq!(recorded.history[0].role, Role::System);
        assert_eq!(recorded.history.len(), 2);
    }

    #[tokio::test]
    async fn test_without_tools_passes_stream_through() {
        let mock = Arc::new(MockCompletionService::new());
        mock.queue_text(&["{\"calls\": []}"]);
        let service = wrap(&mock, ToolFormat::Json);
        let stream = service
            .complete(&sample_history(), &ModelOptions::default())
            .await
            .unwrap();
        let events = collect_events(stream).await;
        assert_eq!(joined_text(&events), "{\"calls\": []}");
        assert_eq!(mock.recorded_calls()[0].history, sample_history());
    }

    #[tokio::test]
    async fn test_parse_failure_is_stream_error() {
        let mock = Arc::new(MockCompletionService::new());
        mock.queue_text(&["{\"calls\": [oops"]);
        let service = wrap(&mock, ToolFormat::Json);
        let stream = service.complete(&sample_history(), &tool_options()).await.unwrap();
        let items = collect_results(stream).await;
        assert!(matches!(items.last(), Some(Err(LlmError::ResponseFormat { .. }))));
    }

    #[tokio::test]
    async fn test_truncated_json_call_is_not_shown_as_text() {
        let mock = Arc::new(MockCompletionService::new());
        mock.queue_text(&[
            r#"{"calls": [{"tool_name": "weather_forecast", "#,
            r#""arguments": {"location": "Ou"#,
        ]);
        let service = wrap(&mock, ToolFormat::Json);
        let stream = service.complete(&sample_history(), &tool_options()).await.unwrap();
        let items = collect_results(stream).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(LlmError::ResponseFormat { .. })));
    }

    #[tokio::test]
    async fn test_inner_error_is_forwarded() {
        let mock = Arc::new(MockCompletionService::new());
        mock.queue_failure_after(
            vec![CompletionEvent::text("par")],
            MockError::Timeout { elapsed_ms: 5 },
        );
        let service = wrap(&mock, ToolFormat::Xml);
        let stream = service.complete(&sample_history(), &tool_options()).await.unwrap();
        let items = collect_results(stream).await;
        assert!(matches!(items[0], Ok(CompletionEvent::Text { .. })));
        assert!(matches!(items[1], Err(LlmError::Timeout { .. })));
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_metadata_advertises_tools() {
        let mock = Arc::new(MockCompletionService::with_metadata(ProviderMetadata {
            name: "bare".into(),
            model: "m".into(),
            context_window: 100,
            capabilities: Default::default(),
        }));
        let service = wrap(&mock, ToolFormat::Raven);
        assert!(
            CompletionService::metadata(&service)
                .capabilities
                .contains(&Capability::Tools)
        );
    }
}
