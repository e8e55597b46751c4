use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::schema::messages;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = messages)]
pub struct Message {
    pub id: i64,
    pub sender_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage<'a> {
    pub id: i64,
    pub sender_id: &'a str,
    pub content: &'a str,
    pub created_at: DateTime<Utc>,
}

/// A persisted chat message joined with its sender's display name, as served
/// by the history route and stored by the in-memory store.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChatMessage {
    pub id: i64,
    pub content: String,
    pub sender_id: String,
    pub sender_display_name: String,
    pub created_at: DateTime<Utc>,
}
