//! Message storage behind a trait: Postgres in production, in-memory in tests.
//!
//! `persist` assigns the message id (snowflake) and timestamp; the pipeline
//! never constructs either itself.

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use relay_common::SnowflakeGenerator;

use crate::db::pool::DbPool;
use crate::db::schema::{messages, users};
use crate::error::ApiError;
use crate::models::message::{ChatMessage, Message, NewMessage};
use crate::models::user::Identity;

/// Persistence-assigned fields of a newly stored message.
#[derive(Debug, Clone, Copy)]
pub struct StoredMessage {
    pub id: i64,
    pub created_at: DateTime<Utc>,
}

/// Abstraction over the durable message log consumed by the message pipeline
/// (live path) and the history route (read path).
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message, assigning its id and timestamp.
    async fn persist(&self, sender: &Identity, content: &str) -> Result<StoredMessage, ApiError>;

    /// The most recent `limit` messages, oldest first.
    async fn list_recent(&self, limit: i64) -> Result<Vec<ChatMessage>, ApiError>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

pub struct PgMessageStore {
    pool: DbPool,
    ids: Arc<SnowflakeGenerator>,
}

impl PgMessageStore {
    pub fn new(pool: DbPool, ids: Arc<SnowflakeGenerator>) -> Self {
        Self { pool, ids }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn persist(&self, sender: &Identity, content: &str) -> Result<StoredMessage, ApiError> {
        let mut conn = self.pool.get().await?;

        let message: Message = diesel::insert_into(messages::table)
            .values(NewMessage {
                id: self.ids.generate(),
                sender_id: &sender.id,
                content,
                created_at: Utc::now(),
            })
            .returning(Message::as_returning())
            .get_result(&mut conn)
            .await?;

        Ok(StoredMessage {
            id: message.id,
            created_at: message.created_at,
        })
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<ChatMessage>, ApiError> {
        let mut conn = self.pool.get().await?;

        // Newest `limit` rows, then reversed so the caller sees oldest first.
        let rows: Vec<(Message, String)> = messages::table
            .inner_join(users::table)
            .order(messages::id.desc())
            .limit(limit)
            .select((Message::as_select(), users::username))
            .load(&mut conn)
            .await?;

        Ok(rows
            .into_iter()
            .rev()
            .map(|(message, username)| ChatMessage {
                id: message.id,
                content: message.content,
                sender_id: message.sender_id,
                sender_display_name: username,
                created_at: message.created_at,
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (for tests)
// ---------------------------------------------------------------------------

pub struct MemoryMessageStore {
    ids: SnowflakeGenerator,
    data: Mutex<Vec<ChatMessage>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self {
            ids: SnowflakeGenerator::new(0),
            data: Mutex::new(Vec::new()),
        }
    }
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn persist(&self, sender: &Identity, content: &str) -> Result<StoredMessage, ApiError> {
        let mut data = self.data.lock().unwrap();

        // Timestamps must be non-decreasing across the log.
        let now = Utc::now();
        let created_at = match data.last() {
            Some(last) if last.created_at > now => last.created_at,
            _ => now,
        };

        let message = ChatMessage {
            id: self.ids.generate(),
            content: content.to_string(),
            sender_id: sender.id.clone(),
            sender_display_name: sender.display_name.clone(),
            created_at,
        };
        data.push(message.clone());

        Ok(StoredMessage {
            id: message.id,
            created_at: message.created_at,
        })
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<ChatMessage>, ApiError> {
        let data = self.data.lock().unwrap();
        let skip = data.len().saturating_sub(limit as usize);
        Ok(data[skip..].to_vec())
    }
}
