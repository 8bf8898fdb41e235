//! Tool handlers, grouped by the data they read or write.

pub(crate) mod calls;
pub(crate) mod crm;
pub(crate) mod reports;
pub(crate) mod writes;

use crate::catalogue::ToolName;
use crate::error::ToolError;
use beyond_ops_integration::{ConnectorError, CrmRecord};
use rootcause::Report;
use serde_json::{Value as JsonValue, json};

/// Maps a connector failure into a tool failure for `tool`.
pub(crate) fn failed(tool: ToolName) -> impl Fn(Report<ConnectorError>) -> Report<ToolError> {
    move |report| {
        ToolError::ExecutionFailed {
            tool: tool.to_string(),
            reason: report.current_context().to_string(),
        }
        .into()
    }
}

pub(crate) fn invalid(tool: ToolName, reason: impl Into<String>) -> Report<ToolError> {
    ToolError::InvalidInput {
        tool: tool.to_string(),
        reason: reason.into(),
    }
    .into()
}

/// Validates a record id argument.
pub(crate) fn require_id<'a>(
    tool: ToolName,
    field: &str,
    value: &'a str,
) -> Result<&'a str, Report<ToolError>> {
    beyond_ops_integration::soql::record_id(value)
        .ok_or_else(|| invalid(tool, format!("`{field}` is not a valid Salesforce id")))
}

/// Validates a non-blank text argument.
pub(crate) fn require_text<'a>(
    tool: ToolName,
    field: &str,
    value: &'a str,
) -> Result<&'a str, Report<ToolError>> {
    let value = value.trim();
    if value.is_empty() {
        return Err(invalid(tool, format!("`{field}` must not be empty")));
    }
    Ok(value)
}

/// Trims an optional filter, dropping blanks.
pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub(crate) fn records_json(records: Vec<CrmRecord>) -> JsonValue {
    JsonValue::Array(records.into_iter().map(JsonValue::Object).collect())
}

/// Renders a telephony failure inside an otherwise successful report.
pub(crate) fn partial_error(report: &Report<ConnectorError>) -> JsonValue {
    json!({ "error": report.current_context().to_string() })
}
