//! The `Capability` trait and its parameter schema.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{Map, Value};

use crate::conversation::Conversation;
use crate::error::CapabilityError;

/// Arguments after coercion to the declared parameter types.
pub type Arguments = Map<String, Value>;

/// Lazily produced text fragments.
pub type TextStream = BoxStream<'static, Result<String, CapabilityError>>;

/// Declared type of a capability parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    /// JSON-schema type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub kind: ParamType,
    pub description: String,
    pub required: bool,
}

/// Ordered parameter declarations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSchema {
    params: Vec<Parameter>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: &str, kind: ParamType, description: &str) -> Self {
        self.push(name, kind, description, true);
        self
    }

    pub fn optional(mut self, name: &str, kind: ParamType, description: &str) -> Self {
        self.push(name, kind, description, false);
        self
    }

    fn push(&mut self, name: &str, kind: ParamType, description: &str, required: bool) {
        self.params.push(Parameter {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required,
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// JSON schema handed to the reasoning backend.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.params {
            properties.insert(
                param.name.clone(),
                serde_json::json!({
                    "type": param.kind.as_str(),
                    "description": param.description,
                }),
            );
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Result of invoking a capability.
pub enum CapabilityOutput {
    Text(String),
    /// Rendered as pretty JSON in the conversation.
    Structured(Value),
    Stream(TextStream),
}

impl CapabilityOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(content.into())
    }

    /// Render eager outputs. Streams yield `None`.
    pub fn render(&self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text.clone()),
            Self::Structured(value) => {
                Some(serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()))
            }
            Self::Stream(_) => None,
        }
    }
}

impl std::fmt::Debug for CapabilityOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Structured(value) => f.debug_tuple("Structured").field(value).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// What a capability sees of the turn it runs in.
#[derive(Debug, Clone)]
pub struct CapabilityContext {
    pub thread_id: String,
    /// Conversation as it was when the capability was selected.
    pub conversation: Conversation,
}

impl CapabilityContext {
    pub fn new(thread_id: impl Into<String>, conversation: Conversation) -> Self {
        Self {
            thread_id: thread_id.into(),
            conversation,
        }
    }
}

/// A unit of functionality the dispatcher can select and invoke.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Unique name.
    fn name(&self) -> &str;

    /// Description shown to the reasoning backend.
    fn description(&self) -> &str;

    /// Routing tags.
    fn tags(&self) -> &[&str];

    fn parameters(&self) -> ParameterSchema;

    async fn invoke(
        &self,
        args: Arguments,
        ctx: &CapabilityContext,
    ) -> Result<CapabilityOutput, CapabilityError>;
}

/// Extract a required string argument.
pub fn require_str<'a>(
    capability: &str,
    args: &'a Arguments,
    name: &str,
) -> Result<&'a str, CapabilityError> {
    args.get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| CapabilityError::ExecutionFailed {
            name: capability.to_string(),
            reason: format!("missing '{name}' argument"),
        })
}
