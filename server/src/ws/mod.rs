pub mod actor;
pub mod handler;
pub mod protocol;

use async_trait::async_trait;
use axum::extract::ws::Message;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::hub::event::ServerEvent;
use crate::hub::registry::ConnectionHandle;
use crate::hub::transport::{DeliveryError, PushTransport};

/// Sender half of a WebSocket connection's outbound channel.
/// Anything holding a clone can push frames to that client.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

/// `PushTransport` over live WebSocket connections.
///
/// Maps each connection handle to its outbound channel; events are sent as
/// JSON text frames.
#[derive(Debug, Clone, Default)]
pub struct WsTransport {
    senders: Arc<DashMap<ConnectionHandle, ConnectionSender>>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, handle: ConnectionHandle, tx: ConnectionSender) {
        self.senders.insert(handle, tx);
    }

    pub fn detach(&self, handle: &ConnectionHandle) {
        self.senders.remove(handle);
    }
}

#[async_trait]
impl PushTransport for WsTransport {
    async fn push(
        &self,
        handle: &ConnectionHandle,
        event: &ServerEvent,
    ) -> Result<(), DeliveryError> {
        let sender = self
            .senders
            .get(handle)
            .map(|entry| entry.value().clone())
            .ok_or(DeliveryError::Detached(*handle))?;

        let text = serde_json::to_string(event)?;
        sender
            .send(Message::Text(text.into()))
            .map_err(|_| DeliveryError::Closed(*handle))
    }
}
