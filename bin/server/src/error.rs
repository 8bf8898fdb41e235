//! API errors and their HTTP rendering.
//!
//! Every error leaves the server as `{"error": "..."}` with a user-safe
//! message; internal details are logged, never returned.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use beyond_ops_conversation::StoreError;
use beyond_ops_platform_access::AuthenticationError;
use rootcause::Report;
use serde_json::json;
use std::fmt;
use tracing::error;

/// Errors returned by route handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Missing or unreadable session.
    Unauthenticated(AuthenticationError),
    /// The conversation does not exist or belongs to someone else.
    NotFound,
    /// The request body is unusable.
    BadRequest { reason: String },
    /// The conversation store could not serve the request.
    StoreUnavailable,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthenticated(err) => write!(f, "{err}"),
            Self::NotFound => write!(f, "Conversation not found"),
            Self::BadRequest { reason } => write!(f, "{reason}"),
            Self::StoreUnavailable => {
                write!(f, "Conversation storage is unavailable, please try again")
            }
        }
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::BadRequest {
            reason: reason.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<Report<StoreError>> for ApiError {
    fn from(report: Report<StoreError>) -> Self {
        match report.current_context() {
            StoreError::NotFound { .. } => Self::NotFound,
            other => {
                error!(error = %other, "conversation store failure");
                Self::StoreUnavailable
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_safe_responses() {
        let not_found: Report<StoreError> = StoreError::NotFound {
            id: "conv_1".to_string(),
        }
        .into();
        assert_eq!(ApiError::from(not_found), ApiError::NotFound);

        let down: Report<StoreError> = StoreError::Unavailable {
            details: "upstash returned 500: token abc".to_string(),
        }
        .into();
        let err = ApiError::from(down);
        assert_eq!(err, ApiError::StoreUnavailable);
        assert!(!err.to_string().contains("abc"));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn auth_errors_are_401_with_fixed_messages() {
        let err = ApiError::Unauthenticated(AuthenticationError::InvalidSession);
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.to_string(), "Invalid session");
    }
}
