//! Python-call notation for function-calling models in the NexusRaven
//! family.
//!
//! Tools are declared as Python function stubs and the model replies with
//! calls such as `weather_forecast(location="Oulu")`, one per line and
//! optionally prefixed with `Call:`. Argument values are split on commas,
//! so quoted values containing a comma are not supported.

use serde_json::{Map, Value};

use super::{ToolParser, ToolPromptCodec, find_tool};
use crate::chat::ToolCall;
use crate::error::LlmError;
use crate::tool::ToolDescriptor;

/// The sentinel function the model calls when no real tool applies.
pub const NO_OP_TOOL: &str = "no_op";

const NO_OP_DECLARATION: &str = "Function:\ndef no_op():\n    \"\"\"\n    \
Call this function when none of the other functions are needed.\n    \"\"\"";

/// Codec for `name(arg=value)` call lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct RavenCodec;

fn python_type(kind: &str) -> &'static str {
    match kind {
        "string" => "str",
        "number" => "float",
        "integer" => "int",
        "boolean" => "bool",
        "array" => "list",
        "object" => "dict",
        _ => "Any",
    }
}

impl ToolPromptCodec for RavenCodec {
    fn system_prompt(&self, tools: &[ToolDescriptor]) -> String {
        let mut blocks: Vec<String> = tools.iter().map(|t| self.tool_to_prompt(t)).collect();
        blocks.push(NO_OP_DECLARATION.to_owned());
        format!(
            "{}\n\nThey will be called automatically when needed.",
            blocks.join("\n\n")
        )
    }

    fn tool_to_prompt(&self, tool: &ToolDescriptor) -> String {
        let args = tool.sorted_args();
        let signature = args
            .iter()
            .map(|a| format!("{}: {}", a.name, python_type(&a.kind)))
            .collect::<Vec<_>>()
            .join(", ");
        let docs: String = args
            .iter()
            .map(|a| {
                format!(
                    "    {} ({}): {}\n",
                    a.name,
                    python_type(&a.kind),
                    a.description
                )
            })
            .collect();
        let result = if tool.result.is_empty() {
            "the tool output"
        } else {
            tool.result.as_str()
        };
        format!(
            "Function:\ndef {name}({signature}):\n    \"\"\"\n    {description}\n\n    Args:\n{docs}\n    \
             Returns:\n    str: {result}\n    \"\"\"",
            name = tool.name,
            description = tool.description,
        )
    }

    fn new_parser(&self, tools: &[ToolDescriptor]) -> Box<dyn ToolParser> {
        Box::new(RavenToolParser::new(tools.to_vec()))
    }

    fn stringify_call(&self, call: &ToolCall) -> String {
        // Map iteration is key-sorted, matching positional binding order.
        let args = call
            .arguments
            .as_object()
            .into_iter()
            .flatten()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({args})", call.tool)
    }

    fn tool_message(&self, calls: &[ToolCall]) -> String {
        let lines = calls
            .iter()
            .map(|c| self.stringify_call(c))
            .collect::<Vec<_>>()
            .join("\n");
        format!("```python\n{lines}\n```")
    }
}

/// Buffering parser for [`RavenCodec`] output.
#[derive(Debug)]
pub struct RavenToolParser {
    tools: Vec<ToolDescriptor>,
    text: String,
}

impl RavenToolParser {
    /// Creates a parser that binds positional arguments using `tools`.
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self {
            tools,
            text: String::new(),
        }
    }

    fn parse_line(&self, line: &str) -> Result<Option<ToolCall>, LlmError> {
        let Some(open) = line.find('(') else {
            return Ok(None);
        };
        let name = line[..open].trim();
        if !is_identifier(name) {
            return Ok(None);
        }
        let close = matching_paren(line, open)
            .ok_or_else(|| LlmError::decode("unbalanced parentheses in tool call", line))?;
        if name == NO_OP_TOOL {
            return Ok(None);
        }

        let tool = find_tool(&self.tools, name);
        let positional_names: Vec<String> = tool
            .map(|t| t.sorted_args().into_iter().map(|a| a.name).collect())
            .unwrap_or_default();

        let mut arguments = Map::new();
        let body = line[open + 1..close].trim();
        if !body.is_empty() {
            for (pos, token) in body.split(',').enumerate() {
                let (arg, raw) = match token.split_once('=') {
                    Some((arg, raw)) => (arg.trim().to_owned(), raw.trim()),
                    None => {
                        let arg = positional_names.get(pos).ok_or_else(|| {
                            LlmError::decode(
                                format!("positional argument {pos} of {name} has no parameter"),
                                line,
                            )
                        })?;
                        (arg.clone(), token.trim())
                    }
                };
                arguments.insert(arg, parse_value(raw));
            }
        }
        Ok(Some(ToolCall::new(name, Value::Object(arguments))))
    }
}

impl ToolParser for RavenToolParser {
    fn append(&mut self, chunk: &str) -> String {
        self.text.push_str(chunk);
        String::new()
    }

    fn parse(&mut self) -> Result<Vec<ToolCall>, LlmError> {
        let text = std::mem::take(&mut self.text);
        let mut calls = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            let line = line.strip_prefix("Call:").map_or(line, str::trim_start);
            if line.is_empty() || line.starts_with("```") {
                continue;
            }
            for expr in split_statements(line) {
                if let Some(call) = self.parse_line(expr)? {
                    calls.push(call);
                }
            }
        }
        Ok(calls)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn matching_paren(s: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in s[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Splits `a(); b()` at top-level semicolons.
fn split_statements(line: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in line.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ';' if depth == 0 => {
                parts.push(line[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(line[start..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}

fn parse_value(raw: &str) -> Value {
    if let Some(inner) = raw
        .strip_prefix('\'')
        .and_then(|r| r.strip_suffix('\''))
    {
        return Value::String(inner.replace("\\'", "'"));
    }
    match raw {
        "True" => return Value::Bool(true),
        "False" => return Value::Bool(false),
        "None" => return Value::Null,
        _ => {}
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}
