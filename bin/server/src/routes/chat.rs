//! The streaming chat endpoint.
//!
//! The response is newline-delimited JSON, one [`ChatEvent`] per line.
//! When the request names a conversation, the final user message and the
//! assembled assistant reply are appended to it before `finish` is sent.

use crate::auth::RequireSession;
use crate::error::ApiError;
use crate::routes::conversations::owned_meta;
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use beyond_ops_ai::{ChatEvent, ModelRole, system_prompt, to_model_messages};
use beyond_ops_conversation::{ChatMessage, ConversationStore, MessageRole};
use beyond_ops_core::ConversationId;
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, instrument};

const LINE_BUFFER: usize = 16;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
}

/// Where to save the exchange once the turn finishes.
struct SaveTo {
    store: ConversationStore,
    id: ConversationId,
    prompt: ChatMessage,
}

#[instrument(skip_all, fields(messages = request.messages.len()))]
pub async fn chat(
    State(state): State<Arc<AppState>>,
    RequireSession(user): RequireSession,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let history = to_model_messages(&request.messages);
    if history.last().map(|m| m.role) != Some(ModelRole::User) {
        return Err(ApiError::bad_request("the last message must come from the user"));
    }

    let save_to = match request.conversation_id {
        Some(id) => {
            owned_meta(&state, &user, &id).await?;
            request
                .messages
                .iter()
                .rev()
                .find(|m| m.role == MessageRole::User)
                .cloned()
                .map(|prompt| SaveTo {
                    store: state.store.clone(),
                    id,
                    prompt,
                })
        }
        None => None,
    };

    info!(turns = history.len(), saving = save_to.is_some(), "chat turn started");
    let events = state
        .orchestrator
        .stream(system_prompt(Utc::now(), user.email()), history);

    let (tx, rx) = mpsc::channel(LINE_BUFFER);
    tokio::spawn(forward(events, tx, save_to));

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    Ok((
        [
            (header::CONTENT_TYPE, "application/x-ndjson"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}

/// Serializes events onto the response body. Returns, and so drops the
/// event receiver, as soon as the client stops reading.
async fn forward(
    mut events: mpsc::Receiver<ChatEvent>,
    lines: mpsc::Sender<String>,
    save_to: Option<SaveTo>,
) {
    while let Some(event) = events.recv().await {
        if let (ChatEvent::Finish { message, .. }, Some(save)) = (&event, &save_to) {
            let exchange = [save.prompt.clone(), message.clone()];
            if let Err(report) = save.store.append_exchange(&save.id, &exchange).await {
                error!(
                    conversation = %save.id,
                    error = %report.current_context(),
                    "failed to save chat exchange"
                );
            }
        }

        let mut line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "failed to encode chat event");
                continue;
            }
        };
        line.push('\n');
        if lines.send(line).await.is_err() {
            debug!("chat client disconnected");
            return;
        }
    }
}
