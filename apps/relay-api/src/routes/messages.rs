//! Message history endpoint, seeding a joining client before live events.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::error::{ApiError, ApiErrorBody};
use crate::models::message::ChatMessage;
use crate::AppState;

/// How many messages a joining client is seeded with.
pub const HISTORY_LIMIT: i64 = 100;

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageHistoryResponse {
    pub messages: Vec<ChatMessage>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/messages", get(list_messages))
}

#[utoipa::path(
    get,
    path = "/api/v1/messages",
    tag = "Messages",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Recent messages, oldest first", body = MessageHistoryResponse),
        (status = 401, description = "Missing or invalid token", body = ApiErrorBody),
    ),
)]
pub async fn list_messages(
    AuthUser { user_id: _ }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<MessageHistoryResponse>, ApiError> {
    let messages = state.messages.list_recent(HISTORY_LIMIT).await?;
    Ok(Json(MessageHistoryResponse { messages }))
}
