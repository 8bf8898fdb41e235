//! Error types for the integration crate.

use std::fmt;

/// Errors from CRM and telephony calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    /// Credentials for the provider are absent.
    NotConfigured { provider: String },
    /// The HTTP request could not be completed.
    RequestFailed { provider: String, reason: String },
    /// The provider answered with a non-success status.
    Api {
        provider: String,
        status: u16,
        message: String,
    },
    /// The provider throttled the request.
    RateLimited {
        provider: String,
        retry_after_secs: Option<u64>,
    },
    /// The provider answered with a body the connector could not read.
    UnexpectedResponse { provider: String, reason: String },
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured { provider } => write!(f, "{provider} is not configured"),
            Self::RequestFailed { provider, reason } => {
                write!(f, "{provider} request failed: {reason}")
            }
            Self::Api {
                provider,
                status,
                message,
            } => write!(f, "{provider} returned {status}: {message}"),
            Self::RateLimited {
                provider,
                retry_after_secs,
            } => {
                if let Some(secs) = retry_after_secs {
                    write!(f, "{provider} rate limited, retry after {secs}s")
                } else {
                    write!(f, "{provider} rate limited")
                }
            }
            Self::UnexpectedResponse { provider, reason } => {
                write!(f, "unexpected {provider} response: {reason}")
            }
        }
    }
}

impl std::error::Error for ConnectorError {}
