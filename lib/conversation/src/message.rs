//! Chat message types.
//!
//! These mirror what the chat client sends and stores: a role, flattened
//! text content, and optional records of the tools the assistant invoked
//! while producing the message.

use beyond_ops_core::MessageId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Sales rep typing into the chat.
    User,
    /// The assistant's reply.
    Assistant,
}

impl MessageRole {
    /// Heading label used in exports.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

/// Lifecycle of a tool invocation as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolInvocationState {
    /// Arguments are still streaming in.
    PartialCall,
    /// The call was issued; no result yet.
    Call,
    /// The call finished and `result` is populated.
    Result,
}

/// Record of one tool call made while producing an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: JsonValue,
    pub state: ToolInvocationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
}

impl ToolInvocation {
    /// Creates a completed invocation record.
    #[must_use]
    pub fn completed(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: JsonValue,
        result: JsonValue,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            args,
            state: ToolInvocationState::Result,
            result: Some(result),
        }
    }
}

/// A message in a persisted conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default = "generate_message_id")]
    pub id: String,
    pub role: MessageRole,
    #[serde(default, deserialize_with = "flatten_content")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_invocations: Option<Vec<ToolInvocation>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Creates a message with a generated id and the current timestamp.
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: generate_message_id(),
            role,
            content: content.into(),
            tool_invocations: None,
            created_at: Utc::now(),
        }
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Attaches a tool invocation record.
    #[must_use]
    pub fn with_tool_invocation(mut self, invocation: ToolInvocation) -> Self {
        self.tool_invocations
            .get_or_insert_with(Vec::new)
            .push(invocation);
        self
    }

    /// Returns the recorded tool invocations.
    #[must_use]
    pub fn tool_invocations(&self) -> &[ToolInvocation] {
        self.tool_invocations.as_deref().unwrap_or_default()
    }
}

fn generate_message_id() -> String {
    MessageId::new().to_string()
}

/// Accepts either a plain string or a list of content parts and keeps only
/// the text, joined by newlines.
fn flatten_content<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Content {
        Text(String),
        Parts(Vec<JsonValue>),
        Null(()),
    }

    Ok(match Content::deserialize(deserializer)? {
        Content::Text(text) => text,
        Content::Parts(parts) => parts
            .iter()
            .filter(|p| p.get("type").and_then(JsonValue::as_str) == Some("text"))
            .filter_map(|p| p.get("text").and_then(JsonValue::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Content::Null(()) => String::new(),
    })
}
