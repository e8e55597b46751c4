//! Broadcast fan-out over the live recipient set.
//!
//! The router reads the recipient set from the presence registry at call
//! time and pushes into each connection's outbound queue. Pushes never
//! block, so a slow recipient cannot delay the others. A push that fails
//! means the receiving task is gone; that connection is dropped from the
//! registry and the failure is otherwise silent.

use std::sync::Arc;

use crate::gateway::events::ServerEvent;
use crate::gateway::registry::{PresenceRegistry, Recipient};

/// Fans events out to every registered connection. Cloneable — store in
/// `AppState`.
#[derive(Clone)]
pub struct BroadcastRouter {
    registry: Arc<PresenceRegistry>,
}

impl BroadcastRouter {
    pub fn new(registry: Arc<PresenceRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver `event` to every connection registered at the moment of the
    /// call.
    pub fn broadcast(&self, event: ServerEvent) {
        self.deliver(self.registry.recipients(), event);
    }

    /// Deliver `event` to every registered connection except `exclude`.
    /// Used for typing indicators, which must not echo back to the typer.
    pub fn broadcast_except(&self, event: ServerEvent, exclude: &str) {
        self.deliver(self.registry.recipients_except(exclude), event);
    }

    fn deliver(&self, recipients: Vec<Recipient>, event: ServerEvent) {
        let event = Arc::new(event);
        for (connection_id, sender) in recipients {
            if sender.send(Arc::clone(&event)).is_err() {
                // Receiver gone: treat as an implicit disconnect.
                if self.registry.deregister(&connection_id) {
                    tracing::debug!(%connection_id, "dropped dead connection during broadcast");
                }
            }
        }
    }
}
