//! HTTP handlers for the conversation log
//!
//! - POST /conversations/:id/messages    append a message
//! - GET  /conversations/:id/messages    list messages (optional `limit` = last N)

use crate::conversation::store::ConversationStore;
use crate::conversation::types::NewMessage;
use crate::error::Result;
use crate::storage::blocking;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct ConversationState {
    pub store: Arc<ConversationStore>,
}

pub fn conversation_router(state: ConversationState) -> Router {
    Router::new()
        .route(
            "/conversations/:id/messages",
            get(list_messages).post(append_message),
        )
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ListMessagesQuery {
    limit: Option<usize>,
}

/// POST /conversations/:id/messages
async fn append_message(
    State(state): State<ConversationState>,
    Path(conversation_id): Path<String>,
    Json(message): Json<NewMessage>,
) -> Result<impl IntoResponse> {
    let store = state.store;
    let message = blocking(move || store.append(&conversation_id, message)).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /conversations/:id/messages
async fn list_messages(
    State(state): State<ConversationState>,
    Path(conversation_id): Path<String>,
    Query(params): Query<ListMessagesQuery>,
) -> Result<impl IntoResponse> {
    let store = state.store;
    let messages = blocking(move || match params.limit {
        Some(n) => store.recent(&conversation_id, n),
        None => store.list(&conversation_id),
    })
    .await?;
    Ok(Json(messages))
}
