use std::sync::Arc;

use crate::auth::jwt::JwtSettings;
use crate::chat::SqliteChatStore;
use crate::db::DbPool;
use crate::hub::{ChatHub, ConnectionRegistry, NotificationHub};
use crate::ws::actor::Keepalive;
use crate::ws::WsTransport;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Access token validation parameters
    pub jwt: Arc<JwtSettings>,
    /// Live `/chatHub` connections per user
    pub chat_registry: ConnectionRegistry,
    /// Live `/notificationHub` connections per user
    pub notification_registry: ConnectionRegistry,
    /// Outbound channels of live WebSocket connections, both endpoints
    pub transport: WsTransport,
    pub chat_store: SqliteChatStore,
    pub chat_hub: ChatHub,
    pub notification_hub: NotificationHub,
    /// Ping interval and pong timeout of every connection actor
    pub keepalive: Keepalive,
}

impl AppState {
    /// Wire the transport and store into both hubs. Each hub routes through
    /// its own registry, so events never cross endpoints.
    pub fn new(db: DbPool, jwt: JwtSettings) -> Self {
        let chat_registry = ConnectionRegistry::new();
        let notification_registry = ConnectionRegistry::new();
        let transport = WsTransport::new();
        let chat_store = SqliteChatStore::new(db);

        let chat_hub = ChatHub::new(
            chat_registry.clone(),
            Arc::new(chat_store.clone()),
            Arc::new(transport.clone()),
        );
        let notification_hub =
            NotificationHub::new(notification_registry.clone(), Arc::new(transport.clone()));

        Self {
            jwt: Arc::new(jwt),
            chat_registry,
            notification_registry,
            transport,
            chat_store,
            chat_hub,
            notification_hub,
            keepalive: Keepalive::default(),
        }
    }

    pub fn with_keepalive(mut self, keepalive: Keepalive) -> Self {
        self.keepalive = keepalive;
        self
    }
}
