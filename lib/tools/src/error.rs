//! Error types for tool execution.
//!
//! These never cross the executor boundary as errors: the executor renders
//! them into an `{"error": "..."}` payload for the model.

use serde_json::{Value as JsonValue, json};
use std::fmt;

/// Errors from parsing or running a tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// The model asked for a tool outside the catalogue.
    UnknownTool { name: String },
    /// The arguments did not match the tool's input schema.
    InvalidInput { tool: String, reason: String },
    /// The external provider call failed.
    ExecutionFailed { tool: String, reason: String },
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTool { name } => write!(f, "unknown tool: {name}"),
            Self::InvalidInput { tool, reason } => {
                write!(f, "invalid input for {tool}: {reason}")
            }
            Self::ExecutionFailed { tool, reason } => write!(f, "{tool} failed: {reason}"),
        }
    }
}

impl std::error::Error for ToolError {}

/// Renders a failure as the value the model receives.
#[must_use]
pub fn error_payload(message: impl Into<String>) -> JsonValue {
    json!({ "error": message.into() })
}

/// Returns true for a value built by [`error_payload`]: an object whose only
/// key is a string `error`. Reports that carry a nested or partial `error`
/// alongside data are successes.
#[must_use]
pub fn is_error_payload(value: &JsonValue) -> bool {
    value
        .as_object()
        .is_some_and(|o| o.len() == 1 && o.get("error").is_some_and(JsonValue::is_string))
}
