//! Validate → persist → broadcast pipeline for inbound chat messages.
//!
//! Persistence and broadcast are separate steps: a message that fails to
//! persist is never broadcast, while a persisted message stays committed
//! even if delivery to some peers fails (that is the router's concern).

use std::sync::Arc;

use thiserror::Error;

use crate::db::messages::MessageStore;
use crate::gateway::events::{MessagePayload, ServerEvent};
use crate::gateway::fanout::BroadcastRouter;
use crate::gateway::session::ChatSession;

/// Maximum message length in characters, after trimming.
pub const MAX_MESSAGE_CHARS: usize = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message content is required")]
    Empty,
    #[error("Message content must be {MAX_MESSAGE_CHARS} characters or fewer")]
    TooLong,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Message could not be saved")]
    Persistence,
}

/// Accepts raw message content from a connection, persists it, and hands the
/// enriched payload to the broadcast router.
pub struct MessagePipeline {
    store: Arc<dyn MessageStore>,
    router: BroadcastRouter,
}

impl MessagePipeline {
    pub fn new(store: Arc<dyn MessageStore>, router: BroadcastRouter) -> Self {
        Self { store, router }
    }

    /// Submit one message. Each connection task awaits this before reading
    /// its next inbound event, which keeps a single sender's messages in
    /// submission order; unrelated senders proceed concurrently.
    pub async fn submit(
        &self,
        raw_content: &str,
        sender: &ChatSession,
    ) -> Result<MessagePayload, SubmitError> {
        let content = raw_content.trim();
        if content.is_empty() {
            return Err(ValidationError::Empty.into());
        }
        if content.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ValidationError::TooLong.into());
        }

        let stored = self
            .store
            .persist(&sender.identity, content)
            .await
            .map_err(|err| {
                tracing::error!(
                    ?err,
                    sender_id = %sender.identity.id,
                    "message persistence failed"
                );
                SubmitError::Persistence
            })?;

        let payload = MessagePayload {
            id: stored.id,
            text: content.to_string(),
            sender_display_name: sender.identity.display_name.clone(),
            sender_id: sender.identity.id.clone(),
            created_at: stored.created_at,
        };
        self.router.broadcast(ServerEvent::Message(payload.clone()));

        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::db::messages::{MemoryMessageStore, StoredMessage};
    use crate::error::ApiError;
    use crate::gateway::registry::PresenceRegistry;
    use crate::models::message::ChatMessage;
    use crate::models::user::Identity;

    struct Fixture {
        store: Arc<MemoryMessageStore>,
        pipeline: MessagePipeline,
        session: ChatSession,
        rx: UnboundedReceiver<Arc<ServerEvent>>,
    }

    /// One registered connection ("alice") whose outbound queue we hold.
    fn fixture() -> Fixture {
        let registry = Arc::new(PresenceRegistry::new());
        let router = BroadcastRouter::new(Arc::clone(&registry));
        let store = Arc::new(MemoryMessageStore::new());
        let pipeline = MessagePipeline::new(store.clone() as Arc<dyn MessageStore>, router);

        let identity = Identity {
            id: "usr_alice".to_string(),
            display_name: "alice".to_string(),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let session = ChatSession::new(identity.clone(), tx);
        registry.register(session.connection_id.clone(), identity, session.handle());

        Fixture {
            store,
            pipeline,
            session,
            rx,
        }
    }

    fn recv_message_text(rx: &mut UnboundedReceiver<Arc<ServerEvent>>) -> String {
        match rx.try_recv().expect("expected a broadcast").as_ref() {
            ServerEvent::Message(payload) => payload.text.clone(),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn valid_message_is_persisted_then_broadcast() {
        let mut f = fixture();

        let payload = f.pipeline.submit("  hello world  ", &f.session).await.unwrap();
        assert_eq!(payload.text, "hello world");
        assert_eq!(payload.sender_display_name, "alice");

        let stored = f.store.list_recent(10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "hello world");
        assert_eq!(stored[0].id, payload.id);

        assert_eq!(recv_message_text(&mut f.rx), "hello world");
    }

    #[tokio::test]
    async fn empty_after_trim_never_reaches_store_or_router() {
        let mut f = fixture();

        let err = f.pipeline.submit("   \t\n ", &f.session).await.unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Validation(ValidationError::Empty)
        ));

        assert!(f.store.list_recent(10).await.unwrap().is_empty());
        assert!(f.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn over_limit_content_is_rejected() {
        let mut f = fixture();

        let err = f
            .pipeline
            .submit(&"a".repeat(MAX_MESSAGE_CHARS + 1), &f.session)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Validation(ValidationError::TooLong)
        ));
        assert!(f.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn limit_is_counted_after_trimming() {
        let mut f = fixture();

        // Exactly at the limit once surrounding whitespace is gone.
        let content = format!("  {}  ", "a".repeat(MAX_MESSAGE_CHARS));
        let payload = f.pipeline.submit(&content, &f.session).await.unwrap();
        assert_eq!(payload.text.chars().count(), MAX_MESSAGE_CHARS);
        assert_eq!(recv_message_text(&mut f.rx).len(), MAX_MESSAGE_CHARS);
    }

    #[tokio::test]
    async fn sender_order_is_preserved_in_store_and_broadcast() {
        let mut f = fixture();

        f.pipeline.submit("first", &f.session).await.unwrap();
        f.pipeline.submit("second", &f.session).await.unwrap();

        let stored = f.store.list_recent(10).await.unwrap();
        assert_eq!(stored[0].content, "first");
        assert_eq!(stored[1].content, "second");
        assert!(stored[0].id < stored[1].id);

        assert_eq!(recv_message_text(&mut f.rx), "first");
        assert_eq!(recv_message_text(&mut f.rx), "second");
    }

    struct FailingStore;

    #[async_trait]
    impl MessageStore for FailingStore {
        async fn persist(
            &self,
            _sender: &Identity,
            _content: &str,
        ) -> Result<StoredMessage, ApiError> {
            Err(ApiError::internal("store is down"))
        }

        async fn list_recent(&self, _limit: i64) -> Result<Vec<ChatMessage>, ApiError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn persistence_failure_broadcasts_nothing() {
        let registry = Arc::new(PresenceRegistry::new());
        let router = BroadcastRouter::new(Arc::clone(&registry));
        let pipeline = MessagePipeline::new(Arc::new(FailingStore), router);

        let identity = Identity {
            id: "usr_alice".to_string(),
            display_name: "alice".to_string(),
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = ChatSession::new(identity.clone(), tx);
        registry.register(session.connection_id.clone(), identity, session.handle());

        let err = pipeline.submit("hello", &session).await.unwrap_err();
        assert!(matches!(err, SubmitError::Persistence));
        assert!(rx.try_recv().is_err());
    }
}
