//! Conversation storage for beyond-ops.
//!
//! This crate provides:
//!
//! - **Messages**: chat messages and the tool invocations attached to them
//! - **Conversation Store**: per-user conversation metadata, message history
//!   and the recency index, all expiring after a period of inactivity
//! - **Export**: Markdown transcripts of a conversation

pub mod conversation;
pub mod error;
pub mod export;
pub mod keys;
pub mod message;
pub mod store;

pub use conversation::{Conversation, ConversationMeta, DEFAULT_TITLE, derive_title};
pub use error::StoreError;
pub use export::to_markdown;
pub use message::{ChatMessage, MessageRole, ToolInvocation, ToolInvocationState};
pub use store::{ConversationStore, DEFAULT_TTL, StoreSettings};
