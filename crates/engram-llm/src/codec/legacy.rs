//! Legacy positional notation.
//!
//! Older prompts declared tools as TypeScript signatures with JSDoc and
//! asked for replies like `weather_forecast("Oulu")`, one call per line,
//! with arguments given positionally in lexicographic name order. Kept
//! for reading transcripts and prompts written in that style.

use serde_json::{Map, Value};

use super::find_tool;
use crate::chat::ToolCall;
use crate::error::LlmError;
use crate::tool::ToolDescriptor;

/// Renders `tools` as JSDoc-annotated TypeScript declarations.
pub fn render_declarations(tools: &[ToolDescriptor]) -> String {
    tools
        .iter()
        .map(|tool| {
            let args = tool.sorted_args();
            let params: String = args
                .iter()
                .map(|a| format!("  * @param {} {}\n", a.name, a.description))
                .collect();
            let signature = args
                .iter()
                .map(|a| format!("{}: {}", a.name, a.kind))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "/**\n  * {}\n{params}**/\nfunction {}({signature}): string;",
                tool.description, tool.name
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Renders one call positionally.
pub fn render_call(call: &ToolCall) -> String {
    let values = call
        .arguments
        .as_object()
        .into_iter()
        .flatten()
        .map(|(_, v)| v.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("{}({values})", call.tool)
}

/// Parses positional call lines against `tools`.
///
/// Lines without a call are ignored. Unknown tools, argument lists that
/// are not valid JSON, and surplus arguments are format errors.
pub fn parse_calls(text: &str, tools: &[ToolDescriptor]) -> Result<Vec<ToolCall>, LlmError> {
    let mut calls = Vec::new();
    for line in text.lines().map(str::trim) {
        let (Some(open), true) = (line.find('('), line.ends_with(')')) else {
            continue;
        };
        let name = line[..open].trim();
        let tool = find_tool(tools, name)
            .ok_or_else(|| LlmError::decode(format!("unknown tool {name:?}"), line))?;
        let values: Vec<Value> = serde_json::from_str(&format!("[{}]", &line[open + 1..line.len() - 1]))
            .map_err(|e| LlmError::decode(format!("invalid arguments for {name}: {e}"), line))?;

        let names = tool.sorted_args();
        if values.len() > names.len() {
            return Err(LlmError::decode(
                format!("{name} takes {} arguments, got {}", names.len(), values.len()),
                line,
            ));
        }
        let arguments: Map<String, Value> = names
            .into_iter()
            .zip(values)
            .map(|(arg, value)| (arg.name, value))
            .collect();
        calls.push(ToolCall::new(name, Value::Object(arguments)));
    }
    Ok(calls)
}
