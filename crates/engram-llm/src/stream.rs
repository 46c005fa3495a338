//! The uniform completion event stream.
//!
//! Every completion service, whether a provider adapter or an orchestrator,
//! yields a [`CompletionStream`]: `Text*`, then at most one `ToolCalls`,
//! then exactly one `End`. A stream that fails mid-way yields one `Err`
//! item and stops; it never fakes an `End`.
//!
//! Adapters do not build streams by hand. They implement [`WireDecoder`]
//! for their framing and hand the response body to [`decode_body`], which
//! owns buffering, termination, and error propagation.

use std::collections::VecDeque;
use std::pin::Pin;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::chat::ToolCall;
use crate::error::LlmError;

/// One unit of completion output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompletionEvent {
    /// A chunk of natural-language output, in generation order.
    Text {
        /// The chunk.
        content: String,
    },
    /// Fully formed tool calls, emitted as one unit.
    ToolCalls {
        /// The calls, in the order the model issued them.
        calls: Vec<ToolCall>,
    },
    /// Terminates the sequence.
    End,
}

impl CompletionEvent {
    /// Shorthand for [`CompletionEvent::Text`].
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }
}

/// A pinned, boxed, `Send` stream of completion events.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<CompletionEvent, LlmError>> + Send>>;

/// Wraps a fixed list of events in a [`CompletionStream`].
pub fn from_events(events: Vec<CompletionEvent>) -> CompletionStream {
    Box::pin(futures::stream::iter(events.into_iter().map(Ok)))
}

/// Checks that `events` form one well-formed completion.
///
/// Any violation is a defect in the producer, so this is meant for tests
/// and debug assertions rather than runtime recovery.
pub fn check_sequence(events: &[CompletionEvent]) -> Result<(), LlmError> {
    let mut seen_calls = false;
    for (index, event) in events.iter().enumerate() {
        let is_last = index + 1 == events.len();
        match event {
            CompletionEvent::Text { .. } if seen_calls => {
                return Err(LlmError::Contract(format!("Text after ToolCalls at {index}")));
            }
            CompletionEvent::Text { .. } => {}
            CompletionEvent::ToolCalls { .. } if seen_calls => {
                return Err(LlmError::Contract(format!("second ToolCalls at {index}")));
            }
            CompletionEvent::ToolCalls { .. } => seen_calls = true,
            CompletionEvent::End if !is_last => {
                return Err(LlmError::Contract(format!("events after End at {index}")));
            }
            CompletionEvent::End => return Ok(()),
        }
    }
    Err(LlmError::Contract("sequence has no End".into()))
}

/// Incremental decoder from a provider's response bytes to events.
///
/// Implementations keep whatever state the wire protocol needs (partial
/// frames, per-slot tool-call buffers) and must uphold the event contract:
/// text is released as it arrives, tool calls are held until the terminal
/// frame, and the terminal frame produces `End`.
///
/// Both methods append to `out`. When one frame in a chunk fails, the
/// events decoded from earlier frames stay in `out` and are delivered
/// ahead of the error.
pub trait WireDecoder: Send + 'static {
    /// Feeds the next chunk of response bytes.
    fn feed(&mut self, chunk: &[u8], out: &mut Vec<CompletionEvent>) -> Result<(), LlmError>;

    /// Called when the body ends. Appends the final events, which must
    /// include `End`, or fails if the stream stopped early.
    fn finish(&mut self, out: &mut Vec<CompletionEvent>) -> Result<(), LlmError>;
}

struct DecodeState<S, D> {
    body: Pin<Box<S>>,
    decoder: D,
    pending: VecDeque<Result<CompletionEvent, LlmError>>,
    done: bool,
}

/// Turns a streaming response body into a [`CompletionStream`].
///
/// The body is read lazily. Reading stops at the first `End` or error,
/// and dropping the returned stream drops the body, which closes the
/// underlying connection.
pub fn decode_body<S, B, E, D>(body: S, decoder: D) -> CompletionStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
    D: WireDecoder,
{
    let state = DecodeState {
        body: Box::pin(body),
        decoder,
        pending: VecDeque::new(),
        done: false,
    };

    let stream = futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                if matches!(item, Ok(CompletionEvent::End) | Err(_)) {
                    state.done = true;
                    state.pending.clear();
                }
                return Some((item, state));
            }
            if state.done {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let mut events = Vec::new();
                    let result = state.decoder.feed(chunk.as_ref(), &mut events);
                    state.pending.extend(events.into_iter().map(Ok));
                    if let Err(e) = result {
                        state.pending.push_back(Err(e));
                    }
                }
                Some(Err(e)) => state.pending.push_back(Err(LlmError::Http {
                    status: None,
                    message: format!("Stream read error: {e}"),
                    retryable: true,
                })),
                None => {
                    state.done = true;
                    let mut events = Vec::new();
                    let result = state.decoder.finish(&mut events);
                    let terminated = events.contains(&CompletionEvent::End);
                    state.pending.extend(events.into_iter().map(Ok));
                    match result {
                        Err(e) => state.pending.push_back(Err(e)),
                        Ok(()) if !terminated => state.pending.push_back(Err(
                            LlmError::Contract("decoder finished without End".into()),
                        )),
                        Ok(()) => {}
                    }
                }
            }
        }
    });

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    /// Treats each comma-separated piece as text; `"!"` ends the stream,
    /// `"?"` fails.
    struct LineDecoder {
        ended: bool,
    }

    impl WireDecoder for LineDecoder {
        fn feed(&mut self, chunk: &[u8], out: &mut Vec<CompletionEvent>) -> Result<(), LlmError> {
            let text = String::from_utf8_lossy(chunk).into_owned();
            for piece in text.split(',') {
                match piece {
                    "!" => {
                        self.ended = true;
                        out.push(CompletionEvent::End);
                    }
                    "?" => return Err(LlmError::decode("bad chunk", piece)),
                    _ => out.push(CompletionEvent::text(piece)),
                }
            }
            Ok(())
        }

        fn finish(&mut self, _out: &mut Vec<CompletionEvent>) -> Result<(), LlmError> {
            if self.ended {
                Ok(())
            } else {
                Err(LlmError::truncated("test"))
            }
        }
    }

    fn body(chunks: &[&'static str]) -> impl Stream<Item = Result<&'static [u8], String>> + Send {
        futures::stream::iter(
            chunks
                .iter()
                .map(|c| Ok::<_, String>(c.as_bytes()))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_decode_body_stops_at_end() {
        let stream = decode_body(body(&["a", "b", "!", "ignored"]), LineDecoder { ended: false });
        let events: Vec<_> = stream.collect().await;
        let events: Vec<_> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            events,
            vec![
                CompletionEvent::text("a"),
                CompletionEvent::text("b"),
                CompletionEvent::End
            ]
        );
    }

    #[tokio::test]
    async fn test_decode_body_error_terminates() {
        let stream = decode_body(body(&["a", "?", "b", "!"]), LineDecoder { ended: false });
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(LlmError::ResponseFormat { .. })));
    }

    #[tokio::test]
    async fn test_decode_body_keeps_events_before_failure_in_same_chunk() {
        let stream = decode_body(body(&["a,b,?,c"]), LineDecoder { ended: false });
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap(), &CompletionEvent::text("a"));
        assert_eq!(items[1].as_ref().unwrap(), &CompletionEvent::text("b"));
        assert!(matches!(items[2], Err(LlmError::ResponseFormat { .. })));
    }

    #[tokio::test]
    async fn test_decode_body_truncated_is_error_not_end() {
        let stream = decode_body(body(&["a"]), LineDecoder { ended: false });
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(LlmError::Http { .. })));
    }

    #[tokio::test]
    async fn test_decode_body_transport_error() {
        let body = futures::stream::iter(vec![
            Ok::<&'static [u8], String>(b"a"),
            Err("connection reset".to_string()),
        ]);
        let items: Vec<_> = decode_body(body, LineDecoder { ended: false }).collect().await;
        assert_eq!(items.len(), 2);
        let err = items[1].as_ref().unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_check_sequence_accepts_valid_shapes() {
        let call = ToolCall::with_id("c1", "foo", json!({}));
        assert!(check_sequence(&[CompletionEvent::End]).is_ok());
        assert!(
            check_sequence(&[
                CompletionEvent::text("a"),
                CompletionEvent::text("b"),
                CompletionEvent::End
            ])
            .is_ok()
        );
        assert!(
            check_sequence(&[
                CompletionEvent::text("a"),
                CompletionEvent::ToolCalls { calls: vec![call] },
                CompletionEvent::End
            ])
            .is_ok()
        );
    }

    #[test]
    fn test_check_sequence_rejects_violations() {
        let calls = || CompletionEvent::ToolCalls { calls: vec![] };
        assert!(check_sequence(&[]).is_err());
        assert!(check_sequence(&[CompletionEvent::text("a")]).is_err());
        assert!(check_sequence(&[calls(), CompletionEvent::text("a"), CompletionEvent::End]).is_err());
        assert!(check_sequence(&[calls(), calls(), CompletionEvent::End]).is_err());
        assert!(check_sequence(&[CompletionEvent::End, CompletionEvent::text("late")]).is_err());
    }

    #[test]
    fn test_event_serde_tag() {
        let value = serde_json::to_value(CompletionEvent::text("hi")).unwrap();
        assert_eq!(value, json!({"type": "text", "content": "hi"}));
        let value = serde_json::to_value(CompletionEvent::End).unwrap();
        assert_eq!(value, json!({"type": "end"}));
    }
}
