//! Error types for the platform-access crate.

use std::fmt;

/// Errors from authenticating a request.
///
/// The display strings are safe to return to clients verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    /// No session cookie on the request.
    MissingSession,
    /// The cookie could not be decoded or carries no email.
    InvalidSession,
}

impl fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSession => write!(f, "Unauthorized"),
            Self::InvalidSession => write!(f, "Invalid session"),
        }
    }
}

impl std::error::Error for AuthenticationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_client_safe() {
        assert_eq!(AuthenticationError::MissingSession.to_string(), "Unauthorized");
        assert_eq!(AuthenticationError::InvalidSession.to_string(), "Invalid session");
    }
}
