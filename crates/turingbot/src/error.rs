//! Error taxonomy for tool dispatch
//!
//! Every fault raised while executing a tool is a [`ToolError`]. The dispatcher
//! never propagates these: they are rendered with [`ToolError::tagged`] and fed
//! back to the model as the tool result.

use std::path::PathBuf;

use thiserror::Error;

use crate::sandbox::SandboxError;

/// Coarse category used to tag tool results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CapabilityViolation,
    NotFound,
    OutsideRoot,
    RuntimeFault,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("cannot modify '{path}': {reason}")]
    ProtectionViolation { path: String, reason: String },

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("path is a directory, not a file: {0}")]
    IsDirectory(String),

    #[error("path '{path}' resolves outside the project root ({})", .resolved.display())]
    OutsideRoot { path: String, resolved: PathBuf },

    #[error("invalid direction '{0}'; valid: +x, -x, +y, -y, +z, -z or up/down/left/right/forward/backward/back")]
    InvalidDirection(String),

    #[error("radius must be non-negative, got {0}")]
    InvalidRadius(i64),

    #[error("'{field}' must be {expected}, got {found}")]
    TypeMismatch {
        field: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("{0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::ProtectionViolation { .. } => ErrorKind::CapabilityViolation,
            ToolError::NotFound(_) => ErrorKind::NotFound,
            ToolError::OutsideRoot { .. } => ErrorKind::OutsideRoot,
            ToolError::Sandbox(e) if e.is_capability_violation() => ErrorKind::CapabilityViolation,
            ToolError::Sandbox(SandboxError::UnknownImport { .. }) => ErrorKind::NotFound,
            ToolError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            _ => ErrorKind::RuntimeFault,
        }
    }

    /// Name of the originating category, carried in runtime-fault tags
    pub fn category(&self) -> &'static str {
        match self {
            ToolError::ProtectionViolation { .. } => "ProtectionViolation",
            ToolError::NotFound(_) => "NotFound",
            ToolError::IsDirectory(_) => "IsDirectory",
            ToolError::OutsideRoot { .. } => "OutsideRoot",
            ToolError::InvalidDirection(_) => "InvalidDirection",
            ToolError::InvalidRadius(_) => "InvalidRadius",
            ToolError::TypeMismatch { .. } => "TypeMismatch",
            ToolError::InvalidArgument(_) => "InvalidArgument",
            ToolError::Sandbox(e) => e.category(),
            ToolError::Io(_) => "Io",
        }
    }

    /// Render as a tool result string for the model
    pub fn tagged(&self) -> String {
        match self.kind() {
            ErrorKind::CapabilityViolation => format!("[capability violation] {}", self),
            ErrorKind::NotFound => format!("[not found] {}", self),
            ErrorKind::OutsideRoot => format!("[outside root] {}", self),
            ErrorKind::RuntimeFault => format!("[error: {}] {}", self.category(), self),
        }
    }

    pub fn type_mismatch(field: &'static str, expected: &'static str, found: &serde_json::Value) -> Self {
        ToolError::TypeMismatch {
            field,
            expected,
            found: json_type_name(found).to_string(),
        }
    }

    pub fn missing(field: &str) -> Self {
        ToolError::InvalidArgument(format!("missing required parameter: {}", field))
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
