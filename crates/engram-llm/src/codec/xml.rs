//! XML tool-call notation.
//!
//! Calls are wrapped in a `<tool_calls>` block. The parser streams text
//! through character by character, holding back only a possible prefix of
//! the opening tag, so prose before and after the block reaches the user
//! without waiting for the end of the completion.

use std::mem;

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{Map, Value};

use super::{ToolParser, ToolPromptCodec, coerce_value, find_tool};
use crate::chat::ToolCall;
use crate::error::LlmError;
use crate::tool::ToolDescriptor;

const START_TAG: &str = "<tool_calls>";
const END_TAG: &str = "</tool_calls>";

/// Codec for the `<tool_calls><invoke>…</invoke></tool_calls>` notation.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlCodec;

impl ToolPromptCodec for XmlCodec {
    fn system_prompt(&self, tools: &[ToolDescriptor]) -> String {
        let tools = tools
            .iter()
            .map(|t| self.tool_to_prompt(t))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "You have access to a set of tools you can use to answer the user's question or act on their behalf.\n\
             \n\
             You may call them like this:\n\
             <tool_calls>\n\
             <invoke>\n\
             <tool_name>$TOOL_NAME</tool_name>\n\
             <parameters>\n\
             <$PARAMETER_NAME>$PARAMETER_VALUE</$PARAMETER_NAME>\n\
             ...\n\
             </parameters>\n\
             </invoke>\n\
             </tool_calls>\n\
             \n\
             Here are the tools available:\n\
             <tools>\n\
             {tools}\n\
             </tools>\n\
             You decide when to call tools. It is ok to call multiple tools, including calling one tool many times. \
             It is also ok to not call any tool if they don't seem relevant.\n\
             \n\
             When calling a tool, don't tell the user about it - just do it!"
        )
    }

    fn tool_to_prompt(&self, tool: &ToolDescriptor) -> String {
        let params: String = tool
            .sorted_args()
            .iter()
            .map(|arg| {
                format!(
                    "<parameter>\n<name>{}</name>\n<type>{}</type>\n<description>{}</description>\n</parameter>\n",
                    escape(arg.name.as_str()),
                    escape(arg.kind.as_str()),
                    escape(arg.description.as_str()),
                )
            })
            .collect();
        format!(
            "<tool>\n<tool_name>{}</tool_name>\n<description>{}</description>\n<parameters>\n{params}</parameters>\n</tool>",
            escape(tool.name.as_str()),
            escape(tool.description.as_str()),
        )
    }

    fn new_parser(&self, tools: &[ToolDescriptor]) -> Box<dyn ToolParser> {
        Box::new(XmlToolParser::new(tools.to_vec()))
    }

    fn stringify_call(&self, call: &ToolCall) -> String {
        let params: String = call
            .arguments
            .as_object()
            .into_iter()
            .flatten()
            .map(|(name, value)| {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                format!("<{name}>{}</{name}>\n", escape(text.as_str()))
            })
            .collect();
        format!(
            "<invoke>\n<tool_name>{}</tool_name>\n<parameters>\n{params}</parameters>\n</invoke>",
            escape(call.tool.as_str())
        )
    }

    fn tool_message(&self, calls: &[ToolCall]) -> String {
        let invokes = calls
            .iter()
            .map(|c| self.stringify_call(c))
            .collect::<Vec<_>>()
            .join("\n");
        format!("{START_TAG}\n{invokes}\n{END_TAG}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    Text,
    /// The first `n` bytes of [`START_TAG`] have been seen and held back.
    MaybeStart(usize),
    InCalls,
}

/// Streaming parser for [`XmlCodec`] output.
#[derive(Debug)]
pub struct XmlToolParser {
    tools: Vec<ToolDescriptor>,
    scan: Scan,
    current: String,
    blocks: Vec<String>,
}

impl XmlToolParser {
    /// Creates a parser typing argument values with `tools`' schemas.
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self {
            tools,
            scan: Scan::Text,
            current: String::new(),
            blocks: Vec::new(),
        }
    }

    fn step(&mut self, c: char, out: &mut String) {
        match self.scan {
            Scan::Text => {
                if c == '<' {
                    self.scan = Scan::MaybeStart(1);
                } else {
                    out.push(c);
                }
            }
            Scan::MaybeStart(n) => {
                if START_TAG[n..].starts_with(c) {
                    if n + 1 == START_TAG.len() {
                        self.scan = Scan::InCalls;
                        self.current.push_str(START_TAG);
                    } else {
                        self.scan = Scan::MaybeStart(n + 1);
                    }
                } else {
                    // Not the tag after all: release what was held and
                    // look at this character afresh.
                    out.push_str(&START_TAG[..n]);
                    self.scan = Scan::Text;
                    self.step(c, out);
                }
            }
            Scan::InCalls => {
                self.current.push(c);
                if self.current.ends_with(END_TAG) {
                    self.blocks.push(mem::take(&mut self.current));
                    self.scan = Scan::Text;
                }
            }
        }
    }
}

impl ToolParser for XmlToolParser {
    fn append(&mut self, chunk: &str) -> String {
        let mut out = String::with_capacity(chunk.len());
        for c in chunk.chars() {
            self.step(c, &mut out);
        }
        out
    }

    fn flush_text(&mut self) -> String {
        match self.scan {
            Scan::MaybeStart(n) => {
                self.scan = Scan::Text;
                START_TAG[..n].to_owned()
            }
            _ => String::new(),
        }
    }

    fn parse(&mut self) -> Result<Vec<ToolCall>, LlmError> {
        if self.scan == Scan::InCalls {
            // Output cut off inside the block: treat the close as implied.
            let mut block = mem::take(&mut self.current);
            block.push_str(END_TAG);
            self.blocks.push(block);
            self.scan = Scan::Text;
        }
        let mut calls = Vec::new();
        for block in mem::take(&mut self.blocks) {
            calls.extend(parse_block(&block, &self.tools)?);
        }
        Ok(calls)
    }
}

fn parse_block(block: &str, tools: &[ToolDescriptor]) -> Result<Vec<ToolCall>, LlmError> {
    let mut reader = Reader::from_str(block);
    let mut calls = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut tool_name: Option<String> = None;
    let mut params: Vec<(String, String)> = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| LlmError::decode(format!("malformed tool call XML: {e}"), block))?;
        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == "invoke" {
                    tool_name = None;
                    params.clear();
                }
                path.push(name);
                text.clear();
            }
            Event::Empty(e) => {
                if path.last().is_some_and(|p| p == "parameters") {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    params.push((name, String::new()));
                }
            }
            Event::Text(t) => match t.unescape() {
                Ok(s) => text.push_str(&s),
                // Models often leave `&` and friends unescaped.
                Err(_) => text.push_str(&String::from_utf8_lossy(&t)),
            },
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c.into_inner())),
            Event::End(_) => {
                let name = path.pop().unwrap_or_default();
                match (name.as_str(), path.last().map(String::as_str)) {
                    ("tool_name", Some("invoke")) => tool_name = Some(text.trim().to_owned()),
                    ("invoke", _) => {
                        let name = tool_name.take().ok_or_else(|| {
                            LlmError::decode("tool call is missing <tool_name>", block)
                        })?;
                        let tool = find_tool(tools, &name);
                        let arguments: Map<String, Value> = params
                            .drain(..)
                            .map(|(arg, raw)| {
                                let value = coerce_value(tool, &arg, &raw);
                                (arg, value)
                            })
                            .collect();
                        calls.push(ToolCall::new(name, Value::Object(arguments)));
                    }
                    (param, Some("parameters")) => {
                        params.push((param.to_owned(), text.trim().to_owned()));
                    }
                    _ => {}
                }
                text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(calls)
}
