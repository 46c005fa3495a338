//! Tool descriptors, the tool registry, and call checking.
//!
//! A [`ToolDescriptor`] is the static description of an external function:
//! what it is called, what it does, and a JSON Schema for its arguments.
//! The same schema drives prompt rendering in every
//! [codec](crate::codec) and argument validation in
//! [`ToolRegistry::check_call`].
//!
//! ```rust
//! use engram_llm::tool::{JsonSchema, ToolDescriptor, ToolRegistry};
//! use engram_llm::ToolCall;
//! use serde_json::json;
//!
//! let mut tools = ToolRegistry::new();
//! tools
//!     .register(ToolDescriptor::new(
//!         "weather_forecast",
//!         "Retrieves the current weather and 5-day forecast for a location.",
//!         JsonSchema::new(json!({
//!             "type": "object",
//!             "properties": { "location": { "type": "string", "description": "City name" } },
//!             "required": ["location"]
//!         })),
//!     ))
//!     .unwrap();
//!
//! let call = ToolCall::new("weather_forecast", json!({"location": "Oulu"}));
//! assert!(tools.check_call(&call).is_ok());
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::{Message, ToolCall};
use crate::error::LlmError;

/// A JSON Schema document used for tool arguments or structured output.
///
/// Wraps a [`serde_json::Value`] and validates instances with the
/// [`jsonschema`] crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonSchema(Value);

impl JsonSchema {
    /// Creates a schema from a raw JSON value.
    pub fn new(schema: Value) -> Self {
        Self(schema)
    }

    /// Returns a reference to the underlying JSON value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// System-prompt text asking for JSON that conforms to this schema.
    ///
    /// Used by adapters whose backend has no native structured output.
    pub fn prompt_instruction(&self) -> String {
        format!(
            "You must respond with valid JSON that conforms to this JSON Schema:\n\
             ```json\n{:#}\n```\n\
             Respond ONLY with the JSON object. No markdown, no explanation.",
            self.0
        )
    }

    /// Derives a schema from a Rust type implementing [`schemars::JsonSchema`].
    ///
    /// Requires the `schema` feature (enabled by default).
    #[cfg(feature = "schema")]
    pub fn from_type<T: schemars::JsonSchema>() -> Result<Self, serde_json::Error> {
        let schema = schemars::schema_for!(T);
        let value = serde_json::to_value(schema)?;
        Ok(Self(value))
    }

    /// Validates `value` against this schema.
    ///
    /// Returns [`LlmError::SchemaValidation`] listing every violation, or
    /// [`LlmError::InvalidRequest`] if the schema itself is malformed.
    pub fn validate(&self, value: &Value) -> Result<(), LlmError> {
        let validator = jsonschema::validator_for(&self.0)
            .map_err(|e| LlmError::InvalidRequest(format!("invalid JSON schema: {e}")))?;
        let errors: Vec<String> = validator
            .iter_errors(value)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(LlmError::SchemaValidation {
                message: errors.join("; "),
                schema: self.0.clone(),
                actual: value.clone(),
            })
        }
    }
}

/// Static description of a callable external function.
///
/// Immutable once registered and identified by [`name`](Self::name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Stable identifier, used in prompts and in parsed output.
    pub name: String,
    /// What the tool does, for the model.
    pub description: String,
    /// Short phrase listed when asking a model whether tools are needed.
    #[serde(default)]
    pub purpose: String,
    /// What the tool returns.
    #[serde(default)]
    pub result: String,
    /// Optional hint on when to use the tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
    /// JSON Schema (object type) describing the arguments.
    pub args: JsonSchema,
}

/// One argument of a tool, as declared in its schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgSpec {
    /// Argument name.
    pub name: String,
    /// JSON Schema type (`"string"`, `"number"`, ...); `"string"` if absent.
    pub kind: String,
    /// Argument description; empty if absent.
    pub description: String,
}

impl ToolDescriptor {
    /// Creates a descriptor; `purpose` defaults to the description and
    /// `result` to empty.
    pub fn new(name: impl Into<String>, description: impl Into<String>, args: JsonSchema) -> Self {
        let description = description.into();
        Self {
            name: name.into(),
            purpose: description.clone(),
            description,
            result: String::new(),
            guidance: None,
            args,
        }
    }

    /// Sets the short purpose phrase.
    #[must_use]
    pub fn purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = purpose.into();
        self
    }

    /// Sets the return value description.
    #[must_use]
    pub fn result(mut self, result: impl Into<String>) -> Self {
        self.result = result.into();
        self
    }

    /// Sets the usage guidance.
    #[must_use]
    pub fn guidance(mut self, guidance: impl Into<String>) -> Self {
        self.guidance = Some(guidance.into());
        self
    }

    /// The declared arguments, sorted lexicographically by name.
    ///
    /// This order is the contract for positional argument formats: the
    /// n-th positional value binds to the n-th name returned here.
    pub fn sorted_args(&self) -> Vec<ArgSpec> {
        let Some(props) = self
            .args
            .as_value()
            .get("properties")
            .and_then(Value::as_object)
        else {
            return Vec::new();
        };
        let mut args: Vec<ArgSpec> = props
            .iter()
            .map(|(name, prop)| ArgSpec {
                name: name.clone(),
                kind: prop
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("string")
                    .to_owned(),
                description: prop
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
            })
            .collect();
        args.sort_by(|a, b| a.name.cmp(&b.name));
        args
    }

    /// The declared JSON type of one argument, if known.
    pub fn arg_kind(&self, name: &str) -> Option<&str> {
        self.args
            .as_value()
            .get("properties")?
            .get(name)?
            .get("type")?
            .as_str()
    }
}

/// A recoverable problem with a parsed tool call.
///
/// Not an error in the [`LlmError`] sense: the conversation continues with
/// [`into_message`](Self::into_message) as the tool's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFailure {
    /// Explanation shown to the model.
    pub error: String,
}

impl ToolFailure {
    /// Builds the tool-result message answering `call`.
    pub fn into_message(self, call: &ToolCall) -> Message {
        Message::tool_result(call.id.clone(), call.tool.clone(), self.error)
    }
}

/// The set of tools known to the process, keyed by name.
///
/// Built once at startup and passed to whatever needs lookups.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool. Names must be unique.
    pub fn register(&mut self, tool: ToolDescriptor) -> Result<(), LlmError> {
        if self.tools.contains_key(&tool.name) {
            return Err(LlmError::InvalidRequest(format!(
                "tool {} is already registered",
                tool.name
            )));
        }
        self.tools.insert(tool.name.clone(), tool);
        Ok(())
    }

    /// Looks up a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    /// Iterates over all tools in name order.
    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.values()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` if no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Clones the named tools, skipping unknown names.
    pub fn select<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<ToolDescriptor> {
        names
            .into_iter()
            .filter_map(|name| self.tools.get(name).cloned())
            .collect()
    }

    /// Checks that `call` names a registered tool and that its arguments
    /// satisfy the tool's schema.
    pub fn check_call(&self, call: &ToolCall) -> Result<&ToolDescriptor, ToolFailure> {
        let Some(tool) = self.tools.get(&call.tool) else {
            return Err(ToolFailure {
                error: format!("Tool {} does not exist.", call.tool),
            });
        };
        match tool.args.validate(&call.arguments) {
            Ok(()) => Ok(tool),
            Err(LlmError::SchemaValidation { message, .. }) => {
                tracing::debug!(tool = %call.tool, %message, "tool call arguments rejected");
                Err(ToolFailure {
                    error: format!("Invalid tool arguments: {message}"),
                })
            }
            Err(e) => Err(ToolFailure {
                error: format!("Invalid tool arguments: {e}"),
            }),
        }
    }
}
