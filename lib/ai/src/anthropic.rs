//! Anthropic Messages API backend.
//!
//! Steps are requested with `stream: true`. The server-sent events are
//! decoded line by line: text deltas are forwarded as they arrive and tool
//! calls are assembled from their JSON fragments when their block closes.

use crate::backend::{
    ChatModel, ContentBlock, ModelChunk, ModelMessage, ModelRequest, ModelResponse, ModelStream,
    StopReason, TokenUsage,
};
use crate::error::LlmError;
use async_trait::async_trait;
use beyond_ops_tools::ToolDefinition;
use futures::future;
use futures::stream::{self, StreamExt};
use reqwest::StatusCode;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::mem;
use tracing::{debug, instrument};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
const API_VERSION: &str = "2023-06-01";

/// Connection settings.
#[derive(Clone, PartialEq, Eq)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
}

impl std::fmt::Debug for AnthropicConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl AnthropicConfig {
    /// Builds settings from environment values, applying defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when the API key is missing or `max_tokens`
    /// is zero.
    pub fn from_parts(
        api_key: Option<&str>,
        model: Option<&str>,
        base_url: Option<&str>,
        max_tokens: u32,
    ) -> Result<Self, LlmError> {
        let Some(api_key) = non_blank(api_key) else {
            return Err(LlmError::InvalidConfig {
                reason: "ANTHROPIC_API_KEY is not set".to_string(),
            });
        };
        if max_tokens == 0 {
            return Err(LlmError::InvalidConfig {
                reason: "max_tokens must be positive".to_string(),
            });
        }
        Ok(Self {
            api_key: api_key.to_string(),
            model: non_blank(model).unwrap_or(DEFAULT_MODEL).to_string(),
            base_url: non_blank(base_url)
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            max_tokens,
        })
    }
}

/// Trims an optional setting, treating blank as unset.
fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [ModelMessage],
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [ToolDefinition],
    stream: bool,
}

fn no_tools(tools: &&[ToolDefinition]) -> bool {
    tools.is_empty()
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

/// Chat model over the Anthropic Messages API.
#[derive(Clone)]
pub struct AnthropicBackend {
    http: reqwest::Client,
    config: AnthropicConfig,
}

impl std::fmt::Debug for AnthropicBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicBackend")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AnthropicBackend {
    /// Creates a backend.
    pub fn new(config: AnthropicConfig) -> Result<Self, Report<LlmError>> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| LlmError::InvalidConfig {
                reason: e.to_string(),
            })?;
        Ok(Self { http, config })
    }

    fn body<'a>(&'a self, request: &'a ModelRequest) -> MessagesBody<'a> {
        MessagesBody {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            system: &request.system,
            messages: &request.messages,
            tools: &request.tools,
            stream: true,
        }
    }
}

#[async_trait]
impl ChatModel for AnthropicBackend {
    #[instrument(skip_all, fields(model = %self.config.model, messages = request.messages.len()))]
    async fn stream(&self, request: &ModelRequest) -> Result<ModelStream, Report<LlmError>> {
        let response = self
            .http
            .post(format!("{}/v1/messages", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&self.body(request))
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            return Err(LlmError::RateLimited { retry_after_secs }.into());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), &body).into());
        }

        let chunks = response
            .bytes_stream()
            .scan(SseDecoder::default(), |decoder, bytes| {
                let chunks = match bytes {
                    Ok(bytes) => decoder.feed(&bytes),
                    Err(e) => vec![Err(LlmError::RequestFailed {
                        reason: e.to_string(),
                    }
                    .into())],
                };
                future::ready(Some(stream::iter(chunks)))
            })
            .flatten()
            .boxed();
        Ok(chunks)
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

/// Server-sent events of a streamed step.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: MessageStart,
    },
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: Delta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDelta,
        #[serde(default)]
        usage: Option<TokenUsage>,
    },
    MessageStop,
    Error {
        error: ErrorDetail,
    },
    /// Pings and anything newer.
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageStart {
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    #[serde(default)]
    stop_reason: Option<StopReason>,
}

/// A content block still receiving deltas.
#[derive(Debug)]
enum OpenBlock {
    Text(String),
    ToolUse { id: String, name: String, json: String },
    Other,
}

/// Rebuilds one step from its events.
#[derive(Debug, Default)]
struct StepAssembler {
    open: BTreeMap<usize, OpenBlock>,
    closed: BTreeMap<usize, ContentBlock>,
    stop_reason: Option<StopReason>,
    usage: TokenUsage,
}

impl StepAssembler {
    fn apply(&mut self, event: StreamEvent) -> Result<Option<ModelChunk>, LlmError> {
        match event {
            StreamEvent::MessageStart { message } => self.usage = message.usage,
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                let (block, chunk) = match content_block {
                    ContentBlock::Text { text } => {
                        let chunk = (!text.is_empty()).then(|| ModelChunk::Text(text.clone()));
                        (OpenBlock::Text(text), chunk)
                    }
                    ContentBlock::ToolUse { id, name, .. } => {
                        let json = String::new();
                        (OpenBlock::ToolUse { id, name, json }, None)
                    }
                    _ => (OpenBlock::Other, None),
                };
                self.open.insert(index, block);
                return Ok(chunk);
            }
            StreamEvent::ContentBlockDelta { index, delta } => {
                match (self.open.get_mut(&index), delta) {
                    (Some(OpenBlock::Text(text)), Delta::TextDelta { text: fragment }) => {
                        text.push_str(&fragment);
                        return Ok(Some(ModelChunk::Text(fragment)));
                    }
                    (
                        Some(OpenBlock::ToolUse { json, .. }),
                        Delta::InputJsonDelta { partial_json },
                    ) => json.push_str(&partial_json),
                    _ => {}
                }
            }
            StreamEvent::ContentBlockStop { index } => {
                let block = match self.open.remove(&index) {
                    Some(OpenBlock::Text(text)) => ContentBlock::Text { text },
                    Some(OpenBlock::ToolUse { id, name, json }) => {
                        let input = tool_input(&name, &json)?;
                        ContentBlock::ToolUse { id, name, input }
                    }
                    Some(OpenBlock::Other) | None => return Ok(None),
                };
                self.closed.insert(index, block);
            }
            StreamEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                if let Some(usage) = usage {
                    self.usage.output_tokens = usage.output_tokens;
                }
            }
            StreamEvent::MessageStop => {
                let step = mem::take(self);
                debug!(
                    stop_reason = ?step.stop_reason,
                    input_tokens = step.usage.input_tokens,
                    output_tokens = step.usage.output_tokens,
                    "model step complete"
                );
                return Ok(Some(ModelChunk::Done(ModelResponse {
                    content: step.closed.into_values().collect(),
                    stop_reason: step.stop_reason,
                    usage: step.usage,
                })));
            }
            StreamEvent::Error { error } => return Err(stream_error(error)),
            StreamEvent::Other => {}
        }
        Ok(None)
    }
}

/// Parses the accumulated input of a tool call. No fragments means no
/// arguments.
fn tool_input(name: &str, json: &str) -> Result<JsonValue, LlmError> {
    if json.trim().is_empty() {
        return Ok(JsonValue::Object(serde_json::Map::new()));
    }
    serde_json::from_str(json).map_err(|e| LlmError::ResponseParseFailed {
        reason: format!("input for {name}: {e}"),
    })
}

/// Splits the body into lines and feeds `data:` payloads to the assembler.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    step: StepAssembler,
}

impl SseDecoder {
    fn feed(&mut self, bytes: &[u8]) -> Vec<Result<ModelChunk, Report<LlmError>>> {
        self.buffer.extend_from_slice(bytes);
        let mut chunks = Vec::new();
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            match self.line(&line) {
                Ok(Some(chunk)) => chunks.push(Ok(chunk)),
                Ok(None) => {}
                Err(err) => {
                    chunks.push(Err(err.into()));
                    break;
                }
            }
        }
        chunks
    }

    fn line(&mut self, line: &[u8]) -> Result<Option<ModelChunk>, LlmError> {
        let line = std::str::from_utf8(line)
            .map_err(|e| LlmError::ResponseParseFailed {
                reason: e.to_string(),
            })?
            .trim_end();
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(None);
        };
        let event = serde_json::from_str(data.trim_start()).map_err(|e| {
            LlmError::ResponseParseFailed {
                reason: format!("stream event: {e}"),
            }
        })?;
        self.step.apply(event)
    }
}

fn stream_error(error: ErrorDetail) -> LlmError {
    if error.kind == "rate_limit_error" {
        return LlmError::RateLimited {
            retry_after_secs: None,
        };
    }
    LlmError::RequestFailed {
        reason: format!("{}: {}", error.kind, error.message),
    }
}

fn api_error(status: u16, body: &str) -> LlmError {
    let reason = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let ErrorDetail { kind, message } = envelope.error;
            format!("{status} {kind}: {message}")
        }
        Err(_) if body.trim().is_empty() => format!("status {status}"),
        Err(_) => format!("status {status}: {}", body.trim()),
    };
    LlmError::RequestFailed { reason }
}
