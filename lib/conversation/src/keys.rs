//! Key layout in the key-value store.
//!
//! | key | type | contents |
//! |---|---|---|
//! | `conversations:{email}` | sorted set | conversation ids scored by last activity (ms) |
//! | `conversation:{id}` | hash | `id`, `title`, `userEmail`, `createdAt`, `updatedAt` (ms) |
//! | `conversation:{id}:messages` | list | one JSON-encoded message per element |
//!
//! All three carry the same TTL, refreshed on every mutation.

use beyond_ops_core::ConversationId;

/// Per-user recency index. Emails are case-folded so one identity maps to
/// one index.
#[must_use]
pub fn index_key(user_email: &str) -> String {
    format!("conversations:{}", user_email.trim().to_lowercase())
}

/// Metadata hash. Older records are a single JSON string.
#[must_use]
pub fn meta_key(id: &ConversationId) -> String {
    format!("conversation:{id}")
}

/// Message list.
#[must_use]
pub fn messages_key(id: &ConversationId) -> String {
    format!("conversation:{id}:messages")
}
