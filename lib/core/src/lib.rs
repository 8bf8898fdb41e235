//! Core types shared by every beyond-ops crate.
//!
//! Provides the strongly-typed identifiers used for conversations and chat
//! messages.

pub mod id;

pub use id::{ConversationId, MessageId, ParseIdError};
