//! Live registry of authenticated connections — the single source of truth
//! for who is online.
//!
//! One mutex serializes every register/deregister/snapshot, so readers always
//! see a point-in-time consistent view. Nothing here blocks: entries only
//! hold the sending half of each connection's outbound queue.

use std::collections::{BTreeSet, HashMap};

use parking_lot::Mutex;

use crate::gateway::session::{ConnectionId, OutboundSender};
use crate::models::user::Identity;

/// One active, authenticated connection.
struct PresenceEntry {
    identity: Identity,
    sender: OutboundSender,
}

/// A delivery target handed to the broadcast router.
pub(crate) type Recipient = (ConnectionId, OutboundSender);

/// Registry keyed by connection id. A single identity may hold several
/// entries at once (e.g. two browser tabs).
pub struct PresenceRegistry {
    inner: Mutex<HashMap<ConnectionId, PresenceEntry>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Register a connection. Idempotent per connection id: registering an
    /// already-registered id replaces its entry.
    pub fn register(&self, connection_id: ConnectionId, identity: Identity, sender: OutboundSender) {
        self.inner
            .lock()
            .insert(connection_id, PresenceEntry { identity, sender });
    }

    /// Remove a connection. A no-op when the id is absent; returns whether
    /// an entry was actually removed.
    pub fn deregister(&self, connection_id: &str) -> bool {
        self.inner.lock().remove(connection_id).is_some()
    }

    /// The display names currently online, de-duplicated and sorted. Order
    /// carries no meaning; sorting just keeps it stable.
    pub fn snapshot(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let names: BTreeSet<&str> = inner
            .values()
            .map(|entry| entry.identity.display_name.as_str())
            .collect();
        names.into_iter().map(str::to_string).collect()
    }

    /// Whether the given user has at least one active connection.
    pub fn is_online(&self, user_id: &str) -> bool {
        self.inner
            .lock()
            .values()
            .any(|entry| entry.identity.id == user_id)
    }

    /// Number of active connections (not distinct users).
    pub fn connection_count(&self) -> usize {
        self.inner.lock().len()
    }

    pub(crate) fn recipients(&self) -> Vec<Recipient> {
        self.inner
            .lock()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.sender.clone()))
            .collect()
    }

    pub(crate) fn recipients_except(&self, exclude: &str) -> Vec<Recipient> {
        self.inner
            .lock()
            .iter()
            .filter(|(id, _)| id.as_str() != exclude)
            .map(|(id, entry)| (id.clone(), entry.sender.clone()))
            .collect()
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn identity(id: &str, name: &str) -> Identity {
        Identity {
            id: id.to_string(),
            display_name: name.to_string(),
        }
    }

    fn sender() -> OutboundSender {
        let (tx, rx) = mpsc::unbounded_channel();
        // Keep the receiver alive for the duration of the test.
        std::mem::forget(rx);
        tx
    }

    #[test]
    fn snapshot_contains_registered_names() {
        let registry = PresenceRegistry::new();
        registry.register("conn_1".into(), identity("u1", "alice"), sender());
        registry.register("conn_2".into(), identity("u2", "bob"), sender());

        assert_eq!(registry.snapshot(), vec!["alice", "bob"]);
    }

    #[test]
    fn snapshot_dedups_display_names_across_connections() {
        let registry = PresenceRegistry::new();
        registry.register("conn_1".into(), identity("u1", "alice"), sender());
        registry.register("conn_2".into(), identity("u1", "alice"), sender());

        assert_eq!(registry.connection_count(), 2);
        assert_eq!(registry.snapshot(), vec!["alice"]);
    }

    #[test]
    fn deregister_removes_only_that_connection() {
        let registry = PresenceRegistry::new();
        registry.register("conn_1".into(), identity("u1", "alice"), sender());
        registry.register("conn_2".into(), identity("u1", "alice"), sender());

        assert!(registry.deregister("conn_1"));
        assert!(registry.is_online("u1"));
        assert_eq!(registry.snapshot(), vec!["alice"]);

        assert!(registry.deregister("conn_2"));
        assert!(!registry.is_online("u1"));
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn deregister_is_idempotent() {
        let registry = PresenceRegistry::new();
        registry.register("conn_1".into(), identity("u1", "alice"), sender());

        assert!(registry.deregister("conn_1"));
        assert!(!registry.deregister("conn_1"));
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn deregister_unknown_is_a_noop() {
        let registry = PresenceRegistry::new();
        assert!(!registry.deregister("conn_missing"));
    }

    #[test]
    fn register_replaces_existing_connection_id() {
        let registry = PresenceRegistry::new();
        registry.register("conn_1".into(), identity("u1", "alice"), sender());
        registry.register("conn_1".into(), identity("u2", "bob"), sender());

        assert_eq!(registry.connection_count(), 1);
        assert_eq!(registry.snapshot(), vec!["bob"]);
    }

    #[test]
    fn snapshot_reflects_net_register_deregister_sequence() {
        let registry = PresenceRegistry::new();
        registry.register("conn_1".into(), identity("u1", "alice"), sender());
        registry.register("conn_2".into(), identity("u2", "bob"), sender());
        registry.register("conn_3".into(), identity("u3", "carol"), sender());
        registry.deregister("conn_2");
        registry.deregister("conn_2");
        registry.register("conn_4".into(), identity("u2", "bob"), sender());
        registry.deregister("conn_3");

        assert_eq!(registry.snapshot(), vec!["alice", "bob"]);
    }

    #[test]
    fn recipients_except_excludes_the_given_connection() {
        let registry = PresenceRegistry::new();
        registry.register("conn_1".into(), identity("u1", "alice"), sender());
        registry.register("conn_2".into(), identity("u2", "bob"), sender());

        let ids: Vec<ConnectionId> = registry
            .recipients_except("conn_1")
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["conn_2"]);
    }
}
