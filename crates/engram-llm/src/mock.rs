//! Mock completion service for testing.
//!
//! [`MockCompletionService`] is a queue-based fake that lets tests script
//! exactly what each `complete` call yields, without touching the network.
//! It implements [`CompletionService`], so it works anywhere a real adapter
//! does, including behind `Arc<dyn DynCompletionService>` in orchestrators.
//!
//! ```rust
//! use engram_llm::mock::MockCompletionService;
//! use engram_llm::{complete_batch, Message, ModelOptions};
//!
//! # async fn example() {
//! let mock = MockCompletionService::new();
//! mock.queue_text(&["Hello", " there"]);
//!
//! let history = vec![Message::system("Be brief."), Message::user("Hi")];
//! let text = complete_batch(&mock, &history, &ModelOptions::default()).await.unwrap();
//! assert_eq!(text, "Hello there");
//! assert_eq!(mock.call_count(), 1);
//! # }
//! ```
//!
//! [`LlmError`] is not `Clone`, so queued failures use the cloneable
//! [`MockError`] and are converted when dequeued.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;

use crate::chat::{Message, ToolCall};
use crate::completion::{Capability, CompletionService, ModelOptions, ProviderMetadata};
use crate::error::LlmError;
use crate::stream::{CompletionEvent, CompletionStream};

/// Cloneable error subset for mock queuing.
#[derive(Debug, Clone)]
pub enum MockError {
    /// Maps to [`LlmError::Http`].
    Http {
        /// HTTP status code, if any.
        status: Option<http::StatusCode>,
        /// Error message.
        message: String,
    },
    /// Maps to [`LlmError::Auth`].
    Auth(String),
    /// Maps to [`LlmError::ResponseFormat`].
    ResponseFormat {
        /// What went wrong.
        message: String,
        /// The raw text.
        raw: String,
    },
    /// Maps to [`LlmError::Timeout`].
    Timeout {
        /// Elapsed milliseconds.
        elapsed_ms: u64,
    },
}

impl MockError {
    fn into_llm_error(self) -> LlmError {
        match self {
            Self::Http { status, message } => LlmError::Http {
                status,
                message,
                retryable: true,
            },
            Self::Auth(msg) => LlmError::Auth(msg),
            Self::ResponseFormat { message, raw } => LlmError::ResponseFormat { message, raw },
            Self::Timeout { elapsed_ms } => LlmError::Timeout { elapsed_ms },
        }
    }
}

/// One recorded `complete` invocation.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// The history passed in.
    pub history: Vec<Message>,
    /// The options passed in.
    pub options: ModelOptions,
}

enum Script {
    Events {
        events: Vec<CompletionEvent>,
        delay: Option<Duration>,
    },
    FailOnOpen(MockError),
    FailAfter(Vec<CompletionEvent>, MockError),
    Stall(Vec<CompletionEvent>, Arc<AtomicBool>),
}

/// A queue-based mock completion service.
///
/// Each `complete` call pops the next script from the queue and records
/// its arguments.
///
/// # Panics
///
/// `complete` panics if the queue is empty.
pub struct MockCompletionService {
    scripts: Mutex<VecDeque<Script>>,
    meta: ProviderMetadata,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl fmt::Debug for MockCompletionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockCompletionService")
            .field("meta", &self.meta)
            .field("queued", &self.scripts.lock().unwrap().len())
            .field("recorded_calls", &self.calls.lock().unwrap().len())
            .finish()
    }
}

impl Default for MockCompletionService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCompletionService {
    /// Creates a mock with default metadata and an empty queue.
    pub fn new() -> Self {
        Self::with_metadata(ProviderMetadata {
            name: "mock".into(),
            model: "mock-model".into(),
            context_window: 4096,
            capabilities: HashSet::from([Capability::Tools]),
        })
    }

    /// Creates a mock reporting the given metadata.
    pub fn with_metadata(meta: ProviderMetadata) -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            meta,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    /// Queues an exact event sequence.
    pub fn queue_events(&self, events: Vec<CompletionEvent>) {
        self.push(Script::Events {
            events,
            delay: None,
        });
    }

    /// Queues an event sequence that yields one event per `delay`.
    pub fn queue_events_slowly(&self, events: Vec<CompletionEvent>, delay: Duration) {
        self.push(Script::Events {
            events,
            delay: Some(delay),
        });
    }

    /// Queues `Text` chunks followed by `End`.
    pub fn queue_text(&self, chunks: &[&str]) {
        let mut events: Vec<_> = chunks.iter().map(|c| CompletionEvent::text(*c)).collect();
        events.push(CompletionEvent::End);
        self.queue_events(events);
    }

    /// Queues one `ToolCalls` event followed by `End`.
    pub fn queue_tool_calls(&self, calls: Vec<ToolCall>) {
        self.queue_events(vec![
            CompletionEvent::ToolCalls { calls },
            CompletionEvent::End,
        ]);
    }

    /// Queues a failure returned from `complete` itself.
    pub fn queue_error(&self, error: MockError) {
        self.push(Script::FailOnOpen(error));
    }

    /// Queues a stream that yields `events` and then fails.
    pub fn queue_failure_after(&self, events: Vec<CompletionEvent>, error: MockError) {
        self.push(Script::FailAfter(events, error));
    }

    /// Queues a stream that yields `events` and then never finishes.
    ///
    /// The returned flag flips to `true` once the stream is dropped, which
    /// is how tests observe cancellation.
    pub fn queue_stall(&self, events: Vec<CompletionEvent>) -> Arc<AtomicBool> {
        let dropped = Arc::new(AtomicBool::new(false));
        self.push(Script::Stall(events, Arc::clone(&dropped)));
        dropped
    }

    /// Every call made so far.
    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl CompletionService for MockCompletionService {
    async fn complete(
        &self,
        history: &[Message],
        options: &ModelOptions,
    ) -> Result<CompletionStream, LlmError> {
        self.calls.lock().unwrap().push(RecordedCall {
            history: history.to_vec(),
            options: options.clone(),
        });
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("MockCompletionService: no queued stream");

        let stream: CompletionStream = match script {
            Script::Events {
                events,
                delay: None,
            } => crate::stream::from_events(events),
            Script::Events {
                events,
                delay: Some(delay),
            } => Box::pin(futures::stream::iter(events).then(move |event| async move {
                tokio::time::sleep(delay).await;
                Ok::<_, LlmError>(event)
            })),
            Script::FailOnOpen(error) => return Err(error.into_llm_error()),
            Script::FailAfter(events, error) => Box::pin(
                futures::stream::iter(events.into_iter().map(Ok))
                    .chain(futures::stream::once(async move { Err(error.into_llm_error()) })),
            ),
            Script::Stall(events, dropped) => {
                let guard = DropFlag(dropped);
                Box::pin(
                    futures::stream::iter(events.into_iter().map(Ok::<_, LlmError>))
                        .chain(futures::stream::pending())
                        .map(move |item| {
                            let _ = &guard;
                            item
                        }),
                )
            }
        };
        Ok(stream)
    }

    fn metadata(&self) -> ProviderMetadata {
        self.meta.clone()
    }
}
