use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::instrument;

use crate::chat::{Message, Role};
use crate::completion::{
    Capability, CompletionService, DynCompletionService, ModelOptions, ProviderMetadata,
    complete_tool_calls,
};
use crate::error::LlmError;
use crate::stream::{CompletionEvent, CompletionStream, from_events};

const DECISION_TEMPERATURE: f32 = 0.001;
const DECISION_MAX_TOKENS: u32 = 512;

/// Runs a chat model and a tool model side by side.
///
/// The chat model starts answering speculatively while the tool model
/// decides whether any tool should be called. If it produces calls, the
/// speculative answer is cancelled and discarded and the result is just
/// those calls; otherwise the chat answer is released unchanged.
///
/// When the last message is a tool result, the chat model alone answers.
#[derive(Clone)]
pub struct Amalgam {
    chat: Arc<dyn DynCompletionService>,
    tool: Arc<dyn DynCompletionService>,
}

impl std::fmt::Debug for Amalgam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Amalgam")
            .field("chat", &self.chat.metadata().model)
            .field("tool", &self.tool.metadata().model)
            .finish()
    }
}

impl Amalgam {
    /// Combines a chat service and a tool-calling service.
    ///
    /// The tool service is used through
    /// [`complete_tool_calls`](crate::complete_tool_calls), so it must only
    /// ever produce calls.
    pub fn new(chat: Arc<dyn DynCompletionService>, tool: Arc<dyn DynCompletionService>) -> Self {
        Self { chat, tool }
    }
}

/// Aborts the speculative chat task when dropped.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl CompletionService for Amalgam {
    #[instrument(skip_all, fields(orchestrator = "amalgam", messages = history.len()))]
    async fn complete(
        &self,
        history: &[Message],
        options: &ModelOptions,
    ) -> Result<CompletionStream, LlmError> {
        let after_tool = history.last().is_some_and(|m| m.role == Role::Tool);
        if after_tool || !options.has_tools() {
            return self.chat.complete_boxed(history, &options.without_tools()).await;
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let chat = Arc::clone(&self.chat);
        let chat_history = history.to_vec();
        let chat_options = options.without_tools();
        let speculative = tokio::spawn(async move {
            let mut stream = match chat.complete_boxed(&chat_history, &chat_options).await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    return;
                }
            };
            while let Some(item) = stream.next().await {
                let last = matches!(item, Ok(CompletionEvent::End) | Err(_));
                if tx.send(item).is_err() || last {
                    return;
                }
            }
        });
        let guard = AbortOnDrop(speculative.abort_handle());

        let decision = ModelOptions {
            temperature: Some(DECISION_TEMPERATURE),
            max_tokens: Some(DECISION_MAX_TOKENS),
            enabled_tools: options.enabled_tools.clone(),
            ..Default::default()
        };
        let calls = complete_tool_calls(self.tool.as_ref(), history, &decision).await?;

        if !calls.is_empty() {
            tracing::debug!(calls = calls.len(), "tool model chose calls; dropping chat reply");
            drop(guard);
            return Ok(from_events(vec![
                CompletionEvent::ToolCalls { calls },
                CompletionEvent::End,
            ]));
        }

        // A failure before the first chat event fails the whole call.
        let first = match rx.recv().await {
            Some(Err(e)) => return Err(e),
            Some(Ok(event)) => event,
            None => {
                return Err(LlmError::Contract(
                    "chat completion ended without output".into(),
                ));
            }
        };
        let ended = first == CompletionEvent::End;
        let rest = futures::stream::unfold((rx, guard, ended), |(mut rx, guard, ended)| async move {
            if ended {
                return None;
            }
            let item = rx.recv().await.unwrap_or_else(|| {
                Err(LlmError::Contract("chat completion ended without End".into()))
            });
            let ended = matches!(item, Ok(CompletionEvent::End) | Err(_));
            Some((item, (rx, guard, ended)))
        });
        Ok(Box::pin(
            futures::stream::once(async move { Ok(first) }).chain(rest),
        ))
    }

    fn metadata(&self) -> ProviderMetadata {
        let chat = self.chat.metadata();
        let mut capabilities = chat.capabilities;
        capabilities.insert(Capability::Tools);
        ProviderMetadata {
            name: "amalgam".into(),
            model: chat.model,
            context_window: chat.context_window,
            capabilities,
        }
    }
}
