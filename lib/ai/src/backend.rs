//! Model backend abstraction.
//!
//! Messages use the content-block shape of the Anthropic Messages API, so
//! the production backend serializes them as-is and test doubles can
//! script responses with the same types.
//!
//! A step is streamed: the backend yields text as it is generated and ends
//! with the assembled [`ModelResponse`].

use crate::error::LlmError;
use async_trait::async_trait;
use beyond_ops_tools::ToolDefinition;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    User,
    Assistant,
}

/// One piece of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: JsonValue,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    /// Block types this crate does not act on, such as thinking output.
    #[serde(other)]
    Other,
}

impl ContentBlock {
    /// Creates a text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// A message sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMessage {
    pub role: ModelRole,
    pub content: Vec<ContentBlock>,
}

impl ModelMessage {
    /// Creates a user message with a single text block.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ModelRole::User,
            content: vec![ContentBlock::text(text)],
        }
    }

    /// Creates an assistant message with a single text block.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ModelRole::Assistant,
            content: vec![ContentBlock::text(text)],
        }
    }
}

/// A request for one model step.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub system: String,
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<ToolDefinition>,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    #[serde(other)]
    Other,
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Returns the total number of tokens.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: JsonValue,
}

/// The model's answer for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub usage: TokenUsage,
}

impl ModelResponse {
    /// Concatenated text blocks.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Tool calls in the order the model issued them.
    #[must_use]
    pub fn tool_uses(&self) -> Vec<ToolUse> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some(ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// The assistant turn to feed back on the next step.
    #[must_use]
    pub fn into_message(self) -> ModelMessage {
        ModelMessage {
            role: ModelRole::Assistant,
            content: self
                .content
                .into_iter()
                .filter(|block| !matches!(block, ContentBlock::Other))
                .collect(),
        }
    }
}

/// One piece of a streamed model step.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelChunk {
    /// Assistant text, in generation order.
    Text(String),
    /// The whole step, sent last.
    Done(ModelResponse),
}

/// Chunks of one model step.
pub type ModelStream = BoxStream<'static, Result<ModelChunk, Report<LlmError>>>;

/// Streams an already complete response: its text blocks, then the response.
#[must_use]
pub fn single_response(response: ModelResponse) -> ModelStream {
    let mut chunks: Vec<_> = response
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } if !text.is_empty() => {
                Some(Ok(ModelChunk::Text(text.clone())))
            }
            _ => None,
        })
        .collect();
    chunks.push(Ok(ModelChunk::Done(response)));
    stream::iter(chunks).boxed()
}

/// Trait for model backends.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Starts one step of the conversation.
    ///
    /// Dropping the returned stream abandons the step.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider call fails before streaming starts.
    /// Failures after that arrive on the stream.
    async fn stream(&self, request: &ModelRequest) -> Result<ModelStream, Report<LlmError>>;

    /// Returns the model name.
    fn model(&self) -> &str;
}
