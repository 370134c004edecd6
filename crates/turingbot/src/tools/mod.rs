//! Tool framework exposed to the reasoning backend
//!
//! Each tool is a thin adapter from a JSON argument object to one operation on
//! the [`SpatialStore`] or the [`CapabilityStore`].

pub mod builtin;
pub mod registry;
pub mod router;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use llm_core::{FunctionDefinition, ToolDefinition};

use crate::codebase::CapabilityStore;
use crate::error::ToolError;
use crate::spatial::SpatialStore;

/// How much a tool can change, shown next to each tool in the system prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    /// Read-only operations
    Safe,
    /// Mutates the tape only
    Moderate,
    /// Writes files or executes extension code
    Dangerous,
}

impl std::fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityLevel::Safe => write!(f, "safe"),
            SecurityLevel::Moderate => write!(f, "moderate"),
            SecurityLevel::Dangerous => write!(f, "dangerous"),
        }
    }
}

/// The stores a tool may act on during one call
pub struct ToolContext<'a> {
    pub spatial: &'a mut SpatialStore,
    pub codebase: &'a mut CapabilityStore,
}

/// Schema for a tool parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterProperty {
    /// Parameter type (string, number, integer, boolean)
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParameterProperty {
    fn typed(param_type: &str, description: impl Into<String>) -> Self {
        Self {
            param_type: param_type.to_string(),
            description: description.into(),
            enum_values: None,
            default: None,
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::typed("string", description)
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Self::typed("integer", description)
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_enum(mut self, values: &[&str]) -> Self {
        self.enum_values = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }
}

/// Schema describing tool parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Type is always "object"
    #[serde(rename = "type")]
    pub schema_type: String,
    pub properties: BTreeMap<String, ParameterProperty>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, prop: ParameterProperty) -> Self {
        self.properties.insert(name.into(), prop);
        self
    }

    pub fn with_required(mut self, name: impl Into<String>, prop: ParameterProperty) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), prop);
        self.required.push(name);
        self
    }
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self::new()
    }
}

/// One tool invocation and its result, as reported in a response's tool log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub arguments: Value,
    pub result: String,
}

/// The Tool trait that all tools implement
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn security_level(&self) -> SecurityLevel;

    fn parameters_schema(&self) -> ParameterSchema;

    /// Execute with a JSON object of arguments
    fn execute(&self, args: &Value, ctx: &mut ToolContext<'_>) -> Result<String, ToolError>;

    /// Convert to a tool definition for the model
    fn to_definition(&self) -> ToolDefinition {
        let parameters = serde_json::to_value(self.parameters_schema())
            .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}));
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: self.name().to_string(),
                description: self.description().to_string(),
                parameters,
            },
        }
    }
}

/// Fetch a required string argument
pub(crate) fn required_str<'v>(args: &'v Value, field: &'static str) -> Result<&'v str, ToolError> {
    match args.get(field) {
        None | Some(Value::Null) => Err(ToolError::missing(field)),
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(ToolError::type_mismatch(field, "a string", other)),
    }
}
