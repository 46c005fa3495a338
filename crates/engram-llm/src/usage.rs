//! Model pricing metadata and token estimation.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::chat::{Message, Part};
use crate::completion::Capability;

/// Static facts about a registered model.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Context window in tokens.
    pub max_tokens: u64,
    /// Cost per 1000 input tokens.
    pub input_cost: f64,
    /// Cost per 1000 output tokens.
    pub output_cost: f64,
    /// Features the model supports.
    #[serde(default)]
    pub capabilities: HashSet<Capability>,
}

impl ModelMetadata {
    /// Cost of one request with the given token counts.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_cost + output_tokens as f64 * self.output_cost) / 1000.0
    }

    /// Returns `true` if the model supports `capability`.
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Estimates how many tokens a message will occupy.
pub trait TokenCounter: Send + Sync + fmt::Debug {
    /// Tokens for one message.
    fn count(&self, message: &Message) -> u64;

    /// Tokens for a whole history.
    fn count_all(&self, history: &[Message]) -> u64 {
        history.iter().map(|m| self.count(m)).sum()
    }
}

/// A tokenizer-free estimate: a fixed rate per character of text and a
/// flat charge per image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimpleTokenCounter {
    /// Tokens per character of text.
    pub tokens_per_char: f64,
    /// Tokens per image part.
    pub tokens_per_image: u64,
}

impl Default for SimpleTokenCounter {
    fn default() -> Self {
        Self {
            tokens_per_char: 0.3,
            tokens_per_image: 1000,
        }
    }
}

impl TokenCounter for SimpleTokenCounter {
    fn count(&self, message: &Message) -> u64 {
        let mut chars = 0usize;
        let mut images = 0u64;
        for part in &message.parts {
            match part {
                Part::Text(text) => chars += text.chars().count(),
                Part::Image(_) => images += 1,
            }
        }
        for call in &message.tool_calls {
            chars += call.tool.len() + call.arguments.to_string().len();
        }
        (chars as f64 * self.tokens_per_char).ceil() as u64 + images * self.tokens_per_image
    }
}
