pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod routes;

use std::sync::Arc;

use config::Config;
use db::messages::MessageStore;
use db::users::UserStore;
use gateway::fanout::BroadcastRouter;
use gateway::pipeline::MessagePipeline;
use gateway::registry::PresenceRegistry;

/// Shared application state available to all route handlers and the gateway.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub users: Arc<dyn UserStore>,
    pub messages: Arc<dyn MessageStore>,
    pub registry: Arc<PresenceRegistry>,
    pub router: BroadcastRouter,
    pub pipeline: Arc<MessagePipeline>,
}

impl AppState {
    /// Wire the gateway core around the given collaborator stores. The
    /// registry is the only shared-mutable core state; router and pipeline
    /// both hang off it.
    pub fn new(
        config: Arc<Config>,
        users: Arc<dyn UserStore>,
        messages: Arc<dyn MessageStore>,
    ) -> Self {
        let registry = Arc::new(PresenceRegistry::new());
        let router = BroadcastRouter::new(Arc::clone(&registry));
        let pipeline = Arc::new(MessagePipeline::new(Arc::clone(&messages), router.clone()));

        Self {
            config,
            users,
            messages,
            registry,
            router,
            pipeline,
        }
    }
}
