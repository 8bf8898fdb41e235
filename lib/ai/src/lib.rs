//! Model access and the chat loop for the beyond-ops assistant.
//!
//! This crate provides:
//!
//! - **Backend**: the [`ChatModel`] trait and its Anthropic implementation
//! - **Orchestrator**: a step-bounded loop that lets the model call tools
//!   and streams [`ChatEvent`]s back to the caller
//! - **History**: conversion of stored conversations into model turns
//! - **Prompt**: the assistant's system prompt

pub mod anthropic;
pub mod backend;
pub mod error;
pub mod event;
pub mod history;
pub mod orchestrator;
pub mod prompt;

pub use anthropic::{AnthropicBackend, AnthropicConfig};
pub use backend::{
    ChatModel, ContentBlock, ModelChunk, ModelMessage, ModelRequest, ModelResponse, ModelRole,
    ModelStream, single_response,
};
pub use error::LlmError;
pub use event::{ChatEvent, FinishReason};
pub use history::to_model_messages;
pub use orchestrator::{ChatSettings, Orchestrator};
pub use prompt::system_prompt;
