//! Route handlers.

pub mod chat;
pub mod conversations;

/// Liveness check.
pub async fn health() -> &'static str {
    "ok"
}
