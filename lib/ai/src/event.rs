//! Events streamed to the chat client.

use beyond_ops_conversation::ChatMessage;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fmt;

/// Why a chat turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    /// The model answered without requesting tools.
    Stop,
    /// The step cap was reached.
    StepLimit,
    /// The client stopped reading.
    Cancelled,
    /// The request ran past its maximum duration.
    Timeout,
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stop => "stop",
            Self::StepLimit => "step-limit",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        })
    }
}

/// One line of the chat stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ChatEvent {
    TextDelta {
        text: String,
    },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        args: JsonValue,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        result: JsonValue,
    },
    StepFinish {
        step: u32,
        tool_calls: usize,
    },
    /// Last event of a turn. `message` is the assembled assistant reply,
    /// ready to be appended to the conversation.
    Finish {
        reason: FinishReason,
        steps: u32,
        message: ChatMessage,
    },
    /// The turn failed; no `finish` follows.
    Error {
        message: String,
    },
}
