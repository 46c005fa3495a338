use std::sync::Arc;

use tracing::instrument;

use super::{append_last, chat_context, drop_system};
use crate::chat::{Message, Role, ToolCall};
use crate::codec::{ToolFormat, ToolPromptCodec};
use crate::completion::{
    Capability, CompletionService, DynCompletionService, ModelOptions, ProviderMetadata,
    complete_batch,
};
use crate::error::LlmError;
use crate::stream::{CompletionEvent, CompletionStream, from_events};

const CLASSIFY_PROMPT: &str = "---\n\
Let's classify the above message. Available categories:\n\
SMALL_TALK: greetings and small talk\n\
QUESTION: questions, information retrieval, etc.\n\
REQUEST: requests to do something\n\
OTHER: everything else\n\
\n\
Reply with the category name only!\n\
\n\
Category:";

const PLAN_PROMPT: &str = "---\n\
Plan how you should reply to the user's message.\n\
\n\
Format your reply like this:\n\
# Plan\n\
<your step-by-step plan as numbered list>\n\
\n\
# Response\n\
<the free-form response to be shown to user>";

const PLAN_STOP: &str = "# Response";

/// The kind of turn the user just took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnCategory {
    /// Greetings and chit-chat; answered by the chat model directly.
    SmallTalk,
    /// Information requests.
    Question,
    /// Requests to do something.
    Request,
    /// Anything else, including unrecognised labels.
    Other,
}

impl TurnCategory {
    /// Reads a classifier reply such as `"SMALL_TALK"` or `"question."`.
    pub fn from_label(label: &str) -> Self {
        let label = label
            .trim()
            .to_lowercase()
            .replace(' ', "_");
        let label = label.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '_');
        if label.starts_with("small_talk") {
            Self::SmallTalk
        } else if label.starts_with("question") {
            Self::Question
        } else if label.starts_with("request") {
            Self::Request
        } else {
            Self::Other
        }
    }
}

/// A pipeline of narrow prompts around a chat model.
///
/// Each turn is handled as:
///
/// 1. classify the last message; small talk goes straight to chat;
/// 2. unless the last message is a tool result, ask the classifier
///    whether any enabled tool is needed and, if so, have the tool model
///    write calls in the codec's notation;
/// 3. with a planner configured, draft a plan and hand it to the chat
///    model along with the conversation;
/// 4. chat.
///
/// Classification, tool and planning models are consumed in batch mode,
/// so they should be plain text services.
#[derive(Clone)]
pub struct MultiStep {
    classifier: Arc<dyn DynCompletionService>,
    tool: Arc<dyn DynCompletionService>,
    chat: Arc<dyn DynCompletionService>,
    planner: Option<Arc<dyn DynCompletionService>>,
    codec: Arc<dyn ToolPromptCodec>,
}

impl std::fmt::Debug for MultiStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiStep")
            .field("chat", &self.chat.metadata().model)
            .field("planner", &self.planner.is_some())
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

impl MultiStep {
    /// Creates a pipeline extracting calls with the JSON codec.
    pub fn new(
        classifier: Arc<dyn DynCompletionService>,
        tool: Arc<dyn DynCompletionService>,
        chat: Arc<dyn DynCompletionService>,
    ) -> Self {
        Self {
            classifier,
            tool,
            chat,
            planner: None,
            codec: ToolFormat::Json.codec(),
        }
    }

    /// Adds a planning step before chat.
    #[must_use]
    pub fn with_planner(mut self, planner: Arc<dyn DynCompletionService>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Uses `codec` to prompt for and parse tool calls.
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn ToolPromptCodec>) -> Self {
        self.codec = codec;
        self
    }

    async fn classify(&self, last: &Message) -> Result<TurnCategory, LlmError> {
        let options = ModelOptions {
            temperature: Some(0.01),
            max_tokens: Some(10),
            ..Default::default()
        };
        let question = append_last(std::slice::from_ref(last), CLASSIFY_PROMPT);
        let label = complete_batch(self.classifier.as_ref(), &question, &options).await?;
        Ok(TurnCategory::from_label(&label))
    }

    async fn tools_needed(
        &self,
        history: &[Message],
        options: &ModelOptions,
    ) -> Result<bool, LlmError> {
        let purposes: String = options
            .enabled_tools
            .iter()
            .map(|t| format!("* {}\n", t.purpose))
            .collect();
        let prompt = format!(
            "---\nYou have access to external tools to:\n{purposes}\n\
             Should any of them be used in this case? Answer with YES or NO only!\n\n\
             Tools needed:"
        );
        let check = ModelOptions {
            temperature: Some(0.01),
            max_tokens: Some(25),
            ..Default::default()
        };
        let answer = complete_batch(
            self.classifier.as_ref(),
            &drop_system(append_last(history, &prompt)),
            &check,
        )
        .await?;
        tracing::debug!(answer = %answer.trim(), "tool relevance check");
        Ok(answer.to_lowercase().contains("yes"))
    }

    async fn tool_calls(
        &self,
        history: &[Message],
        options: &ModelOptions,
    ) -> Result<Vec<ToolCall>, LlmError> {
        let prompt = format!("---\n{}", self.codec.system_prompt(&options.enabled_tools));
        let call = ModelOptions {
            temperature: Some(0.01),
            max_tokens: Some(500),
            ..Default::default()
        };
        let reply = complete_batch(
            self.tool.as_ref(),
            &drop_system(append_last(history, &prompt)),
            &call,
        )
        .await?;
        let mut parser = self.codec.new_parser(&options.enabled_tools);
        parser.append(&reply);
        parser.flush_text();
        parser.parse()
    }
}

impl CompletionService for MultiStep {
    #[instrument(skip_all, fields(orchestrator = "multi_step", messages = history.len()))]
    async fn complete(
        &self,
        history: &[Message],
        options: &ModelOptions,
    ) -> Result<CompletionStream, LlmError> {
        let Some(last) = history.last() else {
            return Err(LlmError::InvalidRequest("history is empty".into()));
        };
        let chat_ctx = chat_context(history);
        let chat_options = options.without_tools();

        let category = self.classify(last).await?;
        tracing::debug!(?category, "classified turn");
        if category == TurnCategory::SmallTalk {
            return self.chat.complete_boxed(&chat_ctx, &chat_options).await;
        }

        if last.role != Role::Tool && options.has_tools() && self.tools_needed(history, options).await? {
            let calls = self.tool_calls(history, options).await?;
            if !calls.is_empty() {
                tracing::debug!(calls = calls.len(), "tool step produced calls");
                return Ok(from_events(vec![
                    CompletionEvent::ToolCalls { calls },
                    CompletionEvent::End,
                ]));
            }
        }

        let Some(planner) = &self.planner else {
            return self.chat.complete_boxed(&chat_ctx, &chat_options).await;
        };
        let plan_options = ModelOptions {
            temperature: Some(0.1),
            max_tokens: Some(500),
            stop: vec![PLAN_STOP.to_owned()],
            ..Default::default()
        };
        let plan = complete_batch(
            planner.as_ref(),
            &append_last(&chat_ctx, PLAN_PROMPT),
            &plan_options,
        )
        .await?;
        tracing::debug!(plan = %plan.trim(), "drafted reply plan");
        let planned = append_last(&chat_ctx, &format!("---\n{plan}"));
        self.chat.complete_boxed(&planned, &chat_options).await
    }

    fn metadata(&self) -> ProviderMetadata {
        let chat = self.chat.metadata();
        let mut capabilities = chat.capabilities;
        capabilities.insert(Capability::Tools);
        ProviderMetadata {
            name: "multi_step".into(),
            model: chat.model,
            context_window: chat.context_window,
            capabilities,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::mock::MockCompletionService;
    use crate::test_helpers::{collect_events, joined_text, sample_history, weather_tool};

    struct Models {
        classifier: Arc<MockCompletionService>,
        tool: Arc<MockCompletionService>,
        chat: Arc<MockCompletionService>,
        planner: Arc<MockCompletionService>,
    }

    impl Models {
        fn new() -> Self {
            Self {
                classifier: Arc::new(MockCompletionService::new()),
                tool: Arc::new(MockCompletionService::new()),
                chat: Arc::new(MockCompletionService::new()),
                planner: Arc::new(MockCompletionService::new()),
            }
        }

        fn pipeline(&self) -> MultiStep {
            MultiStep::new(
                self.classifier.clone(),
                self.tool.clone(),
                self.chat.clone(),
            )
        }
    }

    fn tool_options() -> ModelOptions {
        ModelOptions {
            enabled_tools: vec![weather_tool()],
            ..Default::default()
        }
    }

    #[test]
    fn test_category_labels() {
        assert_eq!(TurnCategory::from_label(" SMALL_TALK\n"), TurnCategory::SmallTalk);
        assert_eq!(TurnCategory::from_label("small talk"), TurnCategory::SmallTalk);
        assert_eq!(TurnCategory::from_label("Question."), TurnCategory::Question);
        assert_eq!(TurnCategory::from_label("REQUEST"), TurnCategory::Request);
        assert_eq!(TurnCategory::from_label("banana"), TurnCategory::Other);
    }

    #[tokio::test]
    async fn test_small_talk_skips_tool_steps() {
        let models = Models::new();
        models.classifier.queue_text(&["SMALL_TALK"]);
        models.chat.queue_text(&["Hi there!"]);

        let history = vec![Message::system("You are an assistant."), Message::user("Hello!")];
        let stream = models.pipeline().complete(&history, &tool_options()).await.unwrap();
        assert_eq!(joined_text(&collect_events(stream).await), "Hi there!");

        assert_eq!(models.classifier.call_count(), 1);
        assert_eq!(models.tool.call_count(), 0);
        assert_eq!(models.chat.call_count(), 1);

        let classified = models.classifier.recorded_calls();
        let question = &classified[0];
        assert_eq!(question.history.len(), 1);
        assert!(question.history[0].text().starts_with("Hello!---\n"));
        assert!(question.history[0].text().ends_with("Category:"));
        assert_eq!(question.options.max_tokens, Some(10));
    }

    #[tokio::test]
    async fn test_question_with_tools_yields_calls() {
        let models = Models::new();
        models.classifier.queue_text(&["QUESTION"]);
        models.classifier.queue_text(&["YES"]);
        models.tool.queue_text(&[
            "{\"calls\": [{\"tool_name\": \"weather_forecast\", \"arguments\": {\"location\": \"Oulu\"}}]}",
        ]);

        let stream = models
            .pipeline()
            .complete(&sample_history(), &tool_options())
            .await
            .unwrap();
        let events = collect_events(stream).await;
        assert_eq!(events.len(), 2);
        let CompletionEvent::ToolCalls { calls } = &events[0] else {
            panic!("expected ToolCalls, got {:?}", events[0]);
        };
        assert_eq!(calls[0].arguments, json!({"location": "Oulu"}));
        assert_eq!(models.chat.call_count(), 0);
        assert_eq!(models.classifier.call_count(), 2);
        assert_eq!(models.tool.call_count(), 1);

        let classifier_calls = models.classifier.recorded_calls();
        let check = &classifier_calls[1];
        assert_eq!(check.history.len(), 1, "system message dropped");
        assert!(check.history[0].text().contains("* Provide weather forecasts\n"));
        assert!(check.history[0].text().ends_with("Tools needed:"));
        assert_eq!(check.options.max_tokens, Some(25));
        let tool_calls = models.tool.recorded_calls();
        let extract = &tool_calls[0];
        assert!(extract.history[0].text().contains("weather_forecast:"));
        assert_eq!(extract.options.max_tokens, Some(500));
    }

    #[tokio::test]
    async fn test_tools_not_needed_goes_to_chat() {
        let models = Models::new();
        models.classifier.queue_text(&["QUESTION"]);
        models.classifier.queue_text(&["NO"]);
        models.chat.queue_text(&["I can't say."]);

        let stream = models
            .pipeline()
            .complete(&sample_history(), &tool_options())
            .await
            .unwrap();
        assert_eq!(joined_text(&collect_events(stream).await), "I can't say.");
        assert_eq!(models.classifier.call_count(), 2);
        assert_eq!(models.tool.call_count(), 0);
        assert!(models.chat.recorded_calls()[0].options.enabled_tools.is_empty());
    }

    #[tokio::test]
    async fn test_after_tool_result_no_tool_check() {
        let models = Models::new();
        models.classifier.queue_text(&["QUESTION"]);
        models.chat.queue_text(&["Sunny."]);

        let call = ToolCall::with_id("c1", "weather_forecast", json!({"location": "Oulu"}));
        let mut history = sample_history();
        history.push(Message::bot_with_calls("", vec![call]));
        history.push(Message::tool_result("c1", "weather_forecast", "Sunny, 21C"));

        let stream = models.pipeline().complete(&history, &tool_options()).await.unwrap();
        assert_eq!(joined_text(&collect_events(stream).await), "Sunny.");
        assert_eq!(models.classifier.call_count(), 1);
        assert_eq!(models.tool.call_count(), 0);

        // The chat model sees the tool result but not the text-less bot turn.
        let chat_calls = models.chat.recorded_calls();
        let roles: Vec<_> = chat_calls[0].history.iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::System, Role::User, Role::Tool]);
    }

    #[tokio::test]
    async fn test_planner_output_is_passed_to_chat() {
        let models = Models::new();
        models.classifier.queue_text(&["REQUEST"]);
        models.classifier.queue_text(&["yes"]);
        models.tool.queue_text(&["{\"calls\": []}"]);
        models.planner.queue_text(&["# Plan\n1. Apologise\n"]);
        models.chat.queue_text(&["Sorry!"]);

        let pipeline = models.pipeline().with_planner(models.planner.clone());
        let stream = pipeline
            .complete(&sample_history(), &tool_options())
            .await
            .unwrap();
        assert_eq!(joined_text(&collect_events(stream).await), "Sorry!");

        let plan_calls = models.planner.recorded_calls();
        assert_eq!(plan_calls[0].options.stop, vec!["# Response".to_owned()]);
        assert_eq!(plan_calls[0].options.temperature, Some(0.1));
        assert!(plan_calls[0].history[1].text().ends_with("<the free-form response to be shown to user>"));

        let chat_calls = models.chat.recorded_calls();
        let last = chat_calls[0].history.last().unwrap().text();
        assert_eq!(last, "What's the weather in Oulu?---\n# Plan\n1. Apologise\n");
    }

    #[tokio::test]
    async fn test_empty_history_is_rejected() {
        let models = Models::new();
        let err = models
            .pipeline()
            .complete(&[], &ModelOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, LlmError::InvalidRequest(_)));
    }
}
