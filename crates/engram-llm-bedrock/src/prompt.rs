//! Flattening of a conversation into the single-prompt bodies Bedrock's
//! text models take.

use engram_llm::chat::{Message, Role};
use engram_llm::error::LlmError;
use engram_llm::ModelOptions;

use crate::config::{BedrockConfig, BodyStyle};
use crate::types::{ClaudeBody, CohereBody};

const CLAUDE_HUMAN: &str = "\n\nHuman:";
const CLAUDE_ASSISTANT: &str = "\n\nAssistant:";
const COHERE_USER: &str = "\nUser:";
const COHERE_ASSISTANT: &str = "\nAssistant:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Speaker {
    Human,
    Assistant,
}

/// System text plus the remaining turns, with empty turns dropped.
struct Transcript {
    system: String,
    turns: Vec<(Speaker, String)>,
}

fn transcript(history: &[Message], options: &ModelOptions) -> Result<Transcript, LlmError> {
    if history.iter().any(|m| m.images().next().is_some()) {
        return Err(LlmError::InvalidRequest(
            "Bedrock text models do not accept image parts".into(),
        ));
    }

    let mut system: Vec<String> = history
        .iter()
        .filter(|m| m.role == Role::System)
        .map(Message::text)
        .filter(|t| !t.is_empty())
        .collect();
    if let Some(schema) = &options.structured_output {
        system.push(schema.prompt_instruction());
    }

    let turns = history
        .iter()
        .filter(|m| m.role != Role::System)
        .filter_map(|m| {
            let text = m.text();
            if text.trim().is_empty() {
                return None;
            }
            let speaker = match m.role {
                Role::Bot => Speaker::Assistant,
                _ => Speaker::Human,
            };
            Some((speaker, text))
        })
        .collect();

    Ok(Transcript {
        system: system.join("\n\n"),
        turns,
    })
}

/// Builds a Claude text-completion prompt.
///
/// The system prompt is merged into the first Human turn, since these
/// models give a bare preamble little weight.
pub(crate) fn claude_prompt(history: &[Message], options: &ModelOptions) -> Result<String, LlmError> {
    let Transcript { system, mut turns } = transcript(history, options)?;
    if !system.is_empty() {
        match turns.first_mut() {
            Some((Speaker::Human, text)) => *text = format!("{system} {text}"),
            _ => turns.insert(0, (Speaker::Human, system)),
        }
    }

    let mut prompt = String::new();
    for (speaker, text) in &turns {
        let label = match speaker {
            Speaker::Human => CLAUDE_HUMAN,
            Speaker::Assistant => CLAUDE_ASSISTANT,
        };
        prompt.push_str(label);
        prompt.push(' ');
        prompt.push_str(text);
    }
    prompt.push_str(CLAUDE_ASSISTANT);
    Ok(prompt)
}

/// Builds a Cohere Command prompt: the system text as a preamble line, then
/// `User:` / `Assistant:` turns.
pub(crate) fn cohere_prompt(history: &[Message], options: &ModelOptions) -> Result<String, LlmError> {
    let Transcript { system, turns } = transcript(history, options)?;
    let mut prompt = String::new();
    if !system.is_empty() {
        prompt.push_str(&system);
        prompt.push('\n');
    }
    for (speaker, text) in &turns {
        let label = match speaker {
            Speaker::Human => COHERE_USER,
            Speaker::Assistant => COHERE_ASSISTANT,
        };
        prompt.push_str(label);
        prompt.push(' ');
        prompt.push_str(text);
    }
    prompt.push_str(COHERE_ASSISTANT);
    Ok(prompt)
}

fn stop_sequences<'a>(turn_marker: &'a str, options: &'a ModelOptions) -> Vec<&'a str> {
    std::iter::once(turn_marker)
        .chain(options.stop.iter().map(String::as_str))
        .collect()
}

/// Serializes the request body for the configured model family.
pub(crate) fn build_body(
    history: &[Message],
    options: &ModelOptions,
    config: &BedrockConfig,
) -> Result<Vec<u8>, LlmError> {
    let max_tokens = options.max_tokens.unwrap_or(config.max_tokens);
    let body = match config.body_style()? {
        BodyStyle::Claude => serde_json::to_vec(&ClaudeBody {
            prompt: claude_prompt(history, options)?,
            temperature: options.temperature,
            max_tokens_to_sample: max_tokens,
            stop_sequences: stop_sequences(CLAUDE_HUMAN, options),
        }),
        BodyStyle::Cohere => serde_json::to_vec(&CohereBody {
            prompt: cohere_prompt(history, options)?,
            temperature: options.temperature,
            max_tokens,
            stream: true,
            stop_sequences: stop_sequences(COHERE_USER, options),
        }),
    };
    body.map_err(|e| LlmError::InvalidRequest(format!("failed to encode Bedrock body: {e}")))
}

#[cfg(test)]
mod tests {
    use engram_llm::chat::ImageRef;
    use engram_llm::JsonSchema;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    use super::*;

    fn conversation() -> Vec<Message> {
        vec![
            Message::system("You are terse."),
            Message::user("Hi"),
            Message::bot("Hello."),
            Message::user("Weather?"),
        ]
    }

    #[test]
    fn test_claude_prompt_merges_system_into_first_turn() {
        let prompt = claude_prompt(&conversation(), &ModelOptions::default()).unwrap();
        assert_eq!(
            prompt,
            "\n\nHuman: You are terse. Hi\n\nAssistant: Hello.\n\nHuman: Weather?\n\nAssistant:"
        );
    }

    #[test]
    fn test_claude_prompt_without_system() {
        let prompt = claude_prompt(&[Message::user("Hi")], &ModelOptions::default()).unwrap();
        assert_eq!(prompt, "\n\nHuman: Hi\n\nAssistant:");
    }

    #[test]
    fn test_claude_prompt_system_only() {
        let prompt = claude_prompt(&[Message::system("Greet me.")], &ModelOptions::default()).unwrap();
        assert_eq!(prompt, "\n\nHuman: Greet me.\n\nAssistant:");
    }

    #[test]
    fn test_cohere_prompt() {
        let prompt = cohere_prompt(&conversation(), &ModelOptions::default()).unwrap();
        assert_eq!(
            prompt,
            "You are terse.\n\nUser: Hi\nAssistant: Hello.\nUser: Weather?\nAssistant:"
        );
    }

    #[test]
    fn test_tool_results_are_human_turns() {
        let history = vec![
            Message::user("Time?"),
            Message::tool_result("call_1", "clock", "12:00"),
        ];
        let prompt = cohere_prompt(&history, &ModelOptions::default()).unwrap();
        assert_eq!(prompt, "\nUser: Time?\nUser: 12:00\nAssistant:");
    }

    #[test]
    fn test_structured_output_instruction_joins_system() {
        let options = ModelOptions {
            structured_output: Some(JsonSchema::new(json!({"type": "object"}))),
            ..Default::default()
        };
        let prompt = claude_prompt(&conversation(), &options).unwrap();
        assert!(prompt.starts_with("\n\nHuman: You are terse.\n\nYou must respond with valid JSON"));
        assert!(prompt.contains("Respond ONLY with the JSON object."));
    }

    #[test]
    fn test_images_rejected() {
        let history = vec![Message::user("Look").with_image(ImageRef::Inline {
            media_type: "image/png".into(),
            data: "iVBORw0KGgo=".into(),
        })];
        let err = claude_prompt(&history, &ModelOptions::default()).unwrap_err();
        assert!(matches!(err, LlmError::InvalidRequest(_)));
    }

    #[test]
    fn test_claude_body() {
        let options = ModelOptions {
            temperature: Some(0.5),
            stop: vec!["END".into()],
            ..Default::default()
        };
        let config = BedrockConfig::default();
        let body: Value =
            serde_json::from_slice(&build_body(&[Message::user("Hi")], &options, &config).unwrap())
                .unwrap();
        assert_eq!(
            body,
            json!({
                "prompt": "\n\nHuman: Hi\n\nAssistant:",
                "temperature": 0.5,
                "max_tokens_to_sample": 1000,
                "stop_sequences": ["\n\nHuman:", "END"],
            })
        );
    }

    #[test]
    fn test_cohere_body() {
        let options = ModelOptions {
            max_tokens: Some(64),
            ..Default::default()
        };
        let config = BedrockConfig {
            model: "cohere.command-text-v14".into(),
            ..Default::default()
        };
        let body: Value =
            serde_json::from_slice(&build_body(&[Message::user("Hi")], &options, &config).unwrap())
                .unwrap();
        assert_eq!(
            body,
            json!({
                "prompt": "\nUser: Hi\nAssistant:",
                "max_tokens": 64,
                "stream": true,
                "stop_sequences": ["\nUser:"],
            })
        );
    }
}
