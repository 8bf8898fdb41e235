//! Conversation REST surface.
//!
//! Every route is scoped to the signed-in user: a conversation owned by
//! someone else is indistinguishable from one that does not exist.

use crate::auth::RequireSession;
use crate::error::ApiError;
use crate::state::AppState;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use beyond_ops_conversation::{ChatMessage, Conversation, ConversationMeta};
use beyond_ops_core::ConversationId;
use beyond_ops_platform_access::SessionUser;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateConversation {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameConversation {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct AppendMessages {
    pub messages: Vec<ChatMessage>,
}

/// Parses a path id; an unparseable id names no conversation.
fn parse_id(raw: &str) -> Result<ConversationId, ApiError> {
    raw.parse().map_err(|_| ApiError::NotFound)
}

/// Loads metadata the caller owns.
pub(crate) async fn owned_meta(
    state: &AppState,
    user: &SessionUser,
    id: &ConversationId,
) -> Result<ConversationMeta, ApiError> {
    match state.store.get_meta(id).await? {
        Some(meta) if meta.is_owned_by(user.email()) => Ok(meta),
        _ => Err(ApiError::NotFound),
    }
}

#[instrument(skip_all)]
pub async fn list(
    State(state): State<Arc<AppState>>,
    RequireSession(user): RequireSession,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<ConversationMeta>>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(state.list_limit)
        .min(state.list_limit);
    let conversations = state.store.get_conversations(user.email(), limit).await?;
    Ok(Json(conversations))
}

#[instrument(skip_all)]
pub async fn create(
    State(state): State<Arc<AppState>>,
    RequireSession(user): RequireSession,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    // The body is optional; an empty one creates an untitled conversation.
    let body: CreateConversation = if body.iter().all(u8::is_ascii_whitespace) {
        CreateConversation::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("invalid body: {e}")))?
    };
    let id = state
        .store
        .create_conversation(user.email(), body.title.as_deref())
        .await?;
    let meta = state.store.get_meta(&id).await?.ok_or(ApiError::StoreUnavailable)?;
    info!(conversation = %id, "conversation created");
    Ok((StatusCode::CREATED, Json(meta)))
}

#[instrument(skip_all, fields(conversation = %raw_id))]
pub async fn show(
    State(state): State<Arc<AppState>>,
    RequireSession(user): RequireSession,
    Path(raw_id): Path<String>,
) -> Result<Json<Conversation>, ApiError> {
    let id = parse_id(&raw_id)?;
    owned_meta(&state, &user, &id).await?;
    let conversation = state.store.get_conversation(&id).await?.ok_or(ApiError::NotFound)?;
    Ok(Json(conversation))
}

#[instrument(skip_all, fields(conversation = %raw_id))]
pub async fn rename(
    State(state): State<Arc<AppState>>,
    RequireSession(user): RequireSession,
    Path(raw_id): Path<String>,
    Json(body): Json<RenameConversation>,
) -> Result<Json<ConversationMeta>, ApiError> {
    let id = parse_id(&raw_id)?;
    owned_meta(&state, &user, &id).await?;
    state.store.update_conversation_title(&id, &body.title).await?;
    let meta = state.store.get_meta(&id).await?.ok_or(ApiError::NotFound)?;
    Ok(Json(meta))
}

#[instrument(skip_all, fields(conversation = %raw_id))]
pub async fn remove(
    State(state): State<Arc<AppState>>,
    RequireSession(user): RequireSession,
    Path(raw_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&raw_id)?;
    state.store.delete_conversation(user.email(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip_all, fields(conversation = %raw_id))]
pub async fn append(
    State(state): State<Arc<AppState>>,
    RequireSession(user): RequireSession,
    Path(raw_id): Path<String>,
    Json(body): Json<AppendMessages>,
) -> Result<Json<ConversationMeta>, ApiError> {
    let id = parse_id(&raw_id)?;
    let meta = owned_meta(&state, &user, &id).await?;
    if body.messages.is_empty() {
        return Ok(Json(meta));
    }
    let meta = state.store.append_exchange(&id, &body.messages).await?;
    Ok(Json(meta))
}

#[instrument(skip_all, fields(conversation = %raw_id))]
pub async fn export(
    State(state): State<Arc<AppState>>,
    RequireSession(user): RequireSession,
    Path(raw_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&raw_id)?;
    owned_meta(&state, &user, &id).await?;
    let markdown = state.store.export_conversation(&id).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/markdown; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{id}.md\""),
            ),
        ],
        markdown,
    ))
}
