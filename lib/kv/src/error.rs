//! Error types for the key-value adapter.

use std::fmt;

/// Errors from key-value store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvError {
    /// Neither accepted URL/token pair is present in the environment.
    NotConfigured,
    /// The HTTP request to the store could not be completed.
    RequestFailed { details: String },
    /// The store rejected the command.
    CommandFailed { command: String, message: String },
    /// The store answered with a shape the adapter did not expect.
    UnexpectedResponse { command: String, details: String },
    /// The key holds a value of a different type than the command expects.
    WrongType { key: String },
}

impl fmt::Display for KvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured => write!(
                f,
                "key-value store is not configured: set KV_REST_API_URL/KV_REST_API_TOKEN \
                 or UPSTASH_REDIS_REST_URL/UPSTASH_REDIS_REST_TOKEN"
            ),
            Self::RequestFailed { details } => {
                write!(f, "key-value request failed: {details}")
            }
            Self::CommandFailed { command, message } => {
                write!(f, "key-value command {command} failed: {message}")
            }
            Self::UnexpectedResponse { command, details } => {
                write!(f, "unexpected response to {command}: {details}")
            }
            Self::WrongType { key } => {
                write!(f, "key '{key}' holds a value of the wrong type")
            }
        }
    }
}

impl std::error::Error for KvError {}
