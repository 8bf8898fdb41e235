//! HTTP API for the beyond-ops sales assistant.
//!
//! Routes:
//!
//! | method | path | |
//! |---|---|---|
//! | POST | `/api/chat` | streamed chat turn (NDJSON) |
//! | GET, POST | `/api/conversations` | list, create |
//! | GET, PATCH, DELETE | `/api/conversations/{id}` | read, rename, delete |
//! | POST | `/api/conversations/{id}/messages` | append an exchange |
//! | GET | `/api/conversations/{id}/export` | Markdown export |
//! | GET | `/healthz` | liveness |
//!
//! Everything under `/api` requires the session cookie.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use error::ApiError;
pub use state::AppState;

use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Builds the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(routes::health))
        .route("/api/chat", post(routes::chat::chat))
        .route(
            "/api/conversations",
            get(routes::conversations::list).post(routes::conversations::create),
        )
        .route(
            "/api/conversations/{id}",
            get(routes::conversations::show)
                .patch(routes::conversations::rename)
                .delete(routes::conversations::remove),
        )
        .route(
            "/api/conversations/{id}/messages",
            post(routes::conversations::append),
        )
        .route(
            "/api/conversations/{id}/export",
            get(routes::conversations::export),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
