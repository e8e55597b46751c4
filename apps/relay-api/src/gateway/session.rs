//! Per-connection session state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::gateway::events::ServerEvent;
use crate::models::user::Identity;

/// Unique id of one live connection (`conn_` prefixed ULID).
pub type ConnectionId = String;

/// Sending half of a connection's outbound event queue. The connection's own
/// task drains the other half into the socket.
pub type OutboundSender = mpsc::UnboundedSender<Arc<ServerEvent>>;

/// State for a single authenticated WebSocket connection.
pub struct ChatSession {
    /// Unique connection identifier.
    pub connection_id: ConnectionId,
    /// The authenticated participant, cached for the connection lifetime.
    pub identity: Identity,
    pub connected_at: DateTime<Utc>,
    outbound: OutboundSender,
}

impl ChatSession {
    pub fn new(identity: Identity, outbound: OutboundSender) -> Self {
        Self {
            connection_id: relay_common::id::prefixed_ulid(relay_common::id::prefix::CONNECTION),
            identity,
            connected_at: Utc::now(),
            outbound,
        }
    }

    /// A clone of the outbound sender, for registration in the presence
    /// registry.
    pub fn handle(&self) -> OutboundSender {
        self.outbound.clone()
    }

    /// Queue an event for this connection only. Errors are ignored: a closed
    /// queue just means the connection is already going away.
    pub fn notify(&self, event: ServerEvent) {
        let _ = self.outbound.send(Arc::new(event));
    }
}
