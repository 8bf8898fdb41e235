//! Conversation metadata and title derivation.

use crate::message::{ChatMessage, MessageRole};
use beyond_ops_core::ConversationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title given to conversations until they are renamed or titled from the
/// first exchange.
pub const DEFAULT_TITLE: &str = "New conversation";

/// Longest auto-derived title, in characters.
pub const MAX_DERIVED_TITLE_CHARS: usize = 80;

/// Metadata describing one conversation.
///
/// `message_count` is never persisted; it is read from the message list
/// whenever metadata is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMeta {
    pub id: ConversationId,
    pub title: String,
    pub user_email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub message_count: u64,
}

impl ConversationMeta {
    /// Returns true if `email` identifies the owner.
    #[must_use]
    pub fn is_owned_by(&self, email: &str) -> bool {
        self.user_email.trim().eq_ignore_ascii_case(email.trim())
    }
}

/// A conversation with its full message history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(flatten)]
    pub meta: ConversationMeta,
    pub messages: Vec<ChatMessage>,
}

/// Builds a title from the first user message of an exchange.
///
/// Whitespace runs collapse to single spaces and the result is cut to
/// [`MAX_DERIVED_TITLE_CHARS`] characters, ending in `...` when truncated.
/// Returns `None` when there is no user message with visible text.
#[must_use]
pub fn derive_title(messages: &[ChatMessage]) -> Option<String> {
    let first = messages
        .iter()
        .find(|m| m.role == MessageRole::User && !m.content.trim().is_empty())?;

    let collapsed = first.content.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= MAX_DERIVED_TITLE_CHARS {
        return Some(collapsed);
    }

    let cut: String = collapsed.chars().take(MAX_DERIVED_TITLE_CHARS - 3).collect();
    Some(format!("{}...", cut.trim_end()))
}
