//! Session cookie decoding.
//!
//! The sign-in flow stores the session as base64-encoded JSON of the form
//! `{"user": {"email": "...", "name": "..."}, ...}`. Only `user.email` is
//! required; everything else is ignored.

use crate::error::AuthenticationError;
use crate::user::SessionUser;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use rootcause::Report;
use serde::Deserialize;
use tracing::debug;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "beyond_ai_session";

#[derive(Debug, Deserialize)]
struct SessionPayload {
    user: Option<PayloadUser>,
}

#[derive(Debug, Deserialize)]
struct PayloadUser {
    email: Option<String>,
    name: Option<String>,
}

/// Decodes a session cookie value into the signed-in user.
///
/// Accepts standard and URL-safe alphabets, with or without padding, and
/// tolerates a percent-encoded `=`.
///
/// # Errors
///
/// `MissingSession` when there is no value, `InvalidSession` for anything
/// that does not yield a non-blank `user.email`.
pub fn decode_session(value: Option<&str>) -> Result<SessionUser, Report<AuthenticationError>> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(AuthenticationError::MissingSession)?;

    let normalized = value.replace("%3D", "=").replace("%3d", "=");
    let encoded = normalized.trim_end_matches('=');
    let bytes = STANDARD_NO_PAD
        .decode(encoded)
        .or_else(|_| URL_SAFE_NO_PAD.decode(encoded))
        .map_err(|e| {
            debug!(error = %e, "session cookie is not base64");
            AuthenticationError::InvalidSession
        })?;

    let payload: SessionPayload = serde_json::from_slice(&bytes).map_err(|e| {
        debug!(error = %e, "session cookie is not a session payload");
        AuthenticationError::InvalidSession
    })?;

    let user = payload.user.ok_or(AuthenticationError::InvalidSession)?;
    let email = user
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or(AuthenticationError::InvalidSession)?;

    Ok(SessionUser::new(email, user.name))
}

/// Encodes a session cookie value for `user`, the inverse of
/// [`decode_session`]. Used by tests and local tooling.
#[must_use]
pub fn encode_session(user: &SessionUser) -> String {
    let payload = serde_json::json!({ "user": user });
    base64::engine::general_purpose::STANDARD.encode(payload.to_string())
}
