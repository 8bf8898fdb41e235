//! Authentication extractor for Axum.

use crate::error::ApiError;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::extract::CookieJar;
use beyond_ops_platform_access::{SESSION_COOKIE, SessionUser, decode_session};
use tracing::debug;

/// Extractor for requiring a signed-in user.
///
/// Rejects with 401 before the handler runs, so no store, model or tool
/// call happens for unauthenticated requests.
pub struct RequireSession(pub SessionUser);

impl<S> FromRequestParts<S> for RequireSession
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let value = jar.get(SESSION_COOKIE).map(|cookie| cookie.value());

        decode_session(value).map(RequireSession).map_err(|report| {
            let err = report.current_context().clone();
            debug!(error = %err, path = %parts.uri.path(), "request rejected");
            ApiError::Unauthenticated(err)
        })
    }
}
