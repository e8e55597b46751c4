//! Wire-format events exchanged over the gateway WebSocket.
//!
//! Everything is JSON, tagged `{"type": ..., "d": ...}`. Disconnects are
//! plain close frames, not events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// An event received from a connected client.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "d", rename_all = "snake_case")]
pub enum ClientEvent {
    SendMessage { content: String },
    Typing,
    StopTyping,
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

/// A broadcast-ready chat message.
#[derive(Debug, Clone, Serialize)]
pub struct MessagePayload {
    pub id: i64,
    pub text: String,
    pub sender_display_name: String,
    pub sender_id: String,
    pub created_at: DateTime<Utc>,
}

/// An event sent to connected clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "d", rename_all = "snake_case")]
pub enum ServerEvent {
    Message(MessagePayload),
    PresenceUpdate { online: Vec<String> },
    UserTyping { display_name: String },
    UserStopTyping { display_name: String },
    AuthError { reason: String },
    Error { message: String },
}

impl ServerEvent {
    pub fn user_typing(display_name: &str) -> Self {
        Self::UserTyping {
            display_name: display_name.to_string(),
        }
    }

    pub fn user_stop_typing(display_name: &str) -> Self {
        Self::UserStopTyping {
            display_name: display_name.to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
