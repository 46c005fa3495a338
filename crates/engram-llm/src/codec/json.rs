//! JSON tool-call notation.
//!
//! The model is asked to reply with `{"calls": [...]}` only. Nothing is
//! passed through while streaming; at the end, any prose before the first
//! `{` is released and the object is decoded.

use serde::Deserialize;
use serde_json::{Value, json};

use super::{ToolParser, ToolPromptCodec};
use crate::chat::ToolCall;
use crate::error::LlmError;
use crate::tool::ToolDescriptor;

const PROMPT_HEAD: &str = "You have access to several external tools, which can be used to retrieve \
information or perform actions. Here are definitions of the tools in YAML format:";

const PROMPT_TAIL: &str = "Based on the earlier conversation, you should decide which (if any) of these \
tools you want to call. If needed, some tools can be called more than once. Format your reply as a JSON \
object, like this:\n\
{ \"calls\": [ {\"tool_name\": \"tool_name\", \"arguments\": {\"arg_name\": \"Argument value\", \
\"another_arg\": \"Another value\"}}, {\"tool_name\": \"another_tool\", \"arguments\": {\"argument\": \
\"Value\"}} ] }\n\
\n\
In any case, your reply should ONLY contain the JSON data.";

/// Codec for the `{"calls": [{"tool_name", "arguments"}]}` notation.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    fn call_value(call: &ToolCall) -> Value {
        json!({ "tool_name": call.tool, "arguments": call.arguments })
    }
}

impl ToolPromptCodec for JsonCodec {
    fn system_prompt(&self, tools: &[ToolDescriptor]) -> String {
        let tools = tools
            .iter()
            .map(|t| self.tool_to_prompt(t))
            .collect::<Vec<_>>()
            .join("\n");
        format!("{PROMPT_HEAD}\n{tools}\n\n{PROMPT_TAIL}")
    }

    fn tool_to_prompt(&self, tool: &ToolDescriptor) -> String {
        let mut out = format!(
            "{name}:\n  tool_name: {name}\n  description: {}\n  arguments:\n",
            tool.description,
            name = tool.name,
        );
        for arg in tool.sorted_args() {
            out.push_str(&format!("    {}: {}\n", arg.name, arg.description));
        }
        if !tool.result.is_empty() {
            out.push_str(&format!("  result: {}\n", tool.result));
        }
        if let Some(guidance) = &tool.guidance {
            out.push_str(&format!("  guidance: {guidance}\n"));
        }
        out
    }

    fn new_parser(&self, _tools: &[ToolDescriptor]) -> Box<dyn ToolParser> {
        Box::new(JsonToolParser::default())
    }

    fn stringify_call(&self, call: &ToolCall) -> String {
        format!("{:#}", Self::call_value(call))
    }

    fn tool_message(&self, calls: &[ToolCall]) -> String {
        let calls: Vec<Value> = calls.iter().map(Self::call_value).collect();
        format!("{:#}", json!({ "calls": calls }))
    }
}

#[derive(Deserialize)]
struct CallList {
    #[serde(default)]
    calls: Option<Vec<CallData>>,
}

#[derive(Deserialize)]
struct CallData {
    tool_name: String,
    #[serde(default)]
    arguments: Value,
}

/// Buffering parser for [`JsonCodec`] output.
#[derive(Debug, Default)]
pub struct JsonToolParser {
    text: String,
}

impl JsonToolParser {
    /// Call content starts at the first `{`.
    fn object_start(&self) -> Option<usize> {
        self.text.find('{')
    }
}

impl ToolParser for JsonToolParser {
    fn append(&mut self, chunk: &str) -> String {
        self.text.push_str(chunk);
        String::new()
    }

    fn flush_text(&mut self) -> String {
        let prose = match self.object_start() {
            Some(start) => self.text.drain(..start).collect(),
            None => std::mem::take(&mut self.text),
        };
        if prose.trim().is_empty() {
            String::new()
        } else {
            prose
        }
    }

    fn parse(&mut self) -> Result<Vec<ToolCall>, LlmError> {
        let Some(start) = self.object_start() else {
            return Ok(Vec::new());
        };
        let raw = &self.text[start..];
        let Some(end) = raw.rfind('}') else {
            return Err(LlmError::decode("tool call reply has an unterminated JSON object", raw));
        };
        let raw = &raw[..=end];
        let list: CallList = match serde_json::from_str(raw) {
            Ok(list) => list,
            // Models sometimes over-escape quotes; retry without backslashes.
            Err(first) => serde_json::from_str(&raw.replace('\\', "")).map_err(|_| {
                LlmError::decode(format!("tool call reply is not valid JSON: {first}"), raw)
            })?,
        };
        Ok(list
            .calls
            .unwrap_or_default()
            .into_iter()
            .map(|c| {
                let arguments = match c.arguments {
                    Value::Null => Value::Object(Default::default()),
                    other => other,
                };
                ToolCall::new(c.tool_name, arguments)
            })
            .collect())
    }
}
