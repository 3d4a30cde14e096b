//! Tool definitions, input schemas, and argument validation.
//!
//! A peer advertises tools as `{name, description, inputSchema}` where the
//! schema is a `{type, properties, required}` tree. Validation checks
//! required-field presence first, then per-property primitive type matching.
//! Nested schemas are carried through unchanged but only the top-level
//! property types are enforced.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ValidationError;

/// The primitive JSON types a schema property can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl SchemaType {
    /// Whether `value` is of this type.
    pub fn matches(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::String, Value::String(_))
                | (Self::Number, Value::Number(_))
                | (Self::Boolean, Value::Bool(_))
                | (Self::Array, Value::Array(_))
                | (Self::Object, Value::Object(_))
        )
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        };
        f.write_str(name)
    }
}

/// The JSON type name of a value, for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Input schema for a tool: `{type, properties, required}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    #[serde(rename = "type")]
    pub kind: SchemaType,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, ToolSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl ToolSchema {
    /// An empty object schema: accepts any arguments.
    pub fn object() -> Self {
        Self {
            kind: SchemaType::Object,
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    /// A leaf schema of the given type.
    pub fn of(kind: SchemaType) -> Self {
        Self {
            kind,
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    /// Add a property to the schema.
    pub fn property(mut self, name: impl Into<String>, schema: ToolSchema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    /// Mark a field as required.
    pub fn require(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    /// Validate a set of arguments against this schema.
    ///
    /// Required fields are checked first, then each supplied argument that
    /// has a matching property is type-checked. Arguments without a
    /// declared property pass through unchecked.
    pub fn validate(&self, args: &Map<String, Value>) -> Result<(), ValidationError> {
        for field in &self.required {
            if !args.contains_key(field) {
                return Err(ValidationError::MissingRequired {
                    field: field.clone(),
                });
            }
        }

        for (name, value) in args {
            if let Some(prop) = self.properties.get(name) {
                if !prop.kind.matches(value) {
                    return Err(ValidationError::WrongType {
                        field: name.clone(),
                        expected: prop.kind,
                        actual: json_type_name(value),
                    });
                }
            }
        }

        Ok(())
    }
}

impl Default for ToolSchema {
    fn default() -> Self {
        Self::object()
    }
}

/// A named, schema-described callable capability exposed by a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: ToolSchema,
}

impl ToolDefinition {
    /// Create a definition with an empty object schema.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: ToolSchema::object(),
        }
    }

    pub fn with_schema(mut self, schema: ToolSchema) -> Self {
        self.input_schema = schema;
        self
    }
}

/// A request to invoke a named tool with a set of arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// One item of tool output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}
