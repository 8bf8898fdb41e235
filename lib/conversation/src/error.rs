//! Error types for the conversation crate.
//!
//! Callers distinguish exactly two conditions: the conversation is gone
//! (`NotFound`) or the store could not serve the request (everything else).

use beyond_ops_kv::KvError;
use rootcause::Report;
use std::fmt;

/// Errors from conversation store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Conversation metadata is absent (deleted or expired).
    NotFound { id: String },
    /// The key-value store failed or is misconfigured.
    Unavailable { details: String },
    /// A record could not be encoded for storage.
    Serialization { details: String },
}

impl StoreError {
    /// Returns true for the not-found condition.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "conversation not found: {id}"),
            Self::Unavailable { details } => {
                write!(f, "conversation store unavailable: {details}")
            }
            Self::Serialization { details } => {
                write!(f, "conversation record could not be encoded: {details}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Maps an adapter failure into the store's single "unavailable" category.
pub(crate) fn unavailable(report: Report<KvError>) -> Report<StoreError> {
    StoreError::Unavailable {
        details: report.current_context().to_string(),
    }
    .into()
}
