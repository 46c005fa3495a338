//! Orchestrators: completion services composed from other services.
//!
//! Both orchestrators implement [`CompletionService`](crate::CompletionService)
//! themselves, so callers cannot tell them apart from a single adapter.
//!
//! - [`Amalgam`] pairs a chat model with a dedicated tool-calling model and
//!   runs them concurrently.
//! - [`MultiStep`] classifies the turn, asks whether tools are needed,
//!   extracts calls, optionally plans, and finally chats.

mod amalgam;
mod multi_step;

pub use amalgam::Amalgam;
pub use multi_step::{MultiStep, TurnCategory};

use crate::chat::{Message, Role};

/// Returns a copy of `history` with `suffix` appended to the last message.
pub(crate) fn append_last(history: &[Message], suffix: &str) -> Vec<Message> {
    let mut out = history.to_vec();
    if let Some(last) = out.last_mut() {
        last.append_text(suffix);
    }
    out
}

/// Drops a leading system message.
pub(crate) fn drop_system(mut history: Vec<Message>) -> Vec<Message> {
    if history.first().is_some_and(|m| m.role == Role::System) {
        history.remove(0);
    }
    history
}

/// The history as a plain chat model should see it: earlier tool results
/// and text-less turns removed, the final message always kept.
pub(crate) fn chat_context(history: &[Message]) -> Vec<Message> {
    let Some((last, earlier)) = history.split_last() else {
        return Vec::new();
    };
    earlier
        .iter()
        .filter(|m| m.role != Role::Tool && m.has_text())
        .chain(std::iter::once(last))
        .cloned()
        .collect()
}
