//! Chat hub: binds a connection to its verified identity, persists inbound
//! messages and fans them out to every live connection of the session's
//! participants.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::chat::{ChatSessionId, ChatStore, Message, NewMessage, StoredMessage};
use crate::hub::error::{AuthorizationError, HubError};
use crate::hub::event::ServerEvent;
use crate::hub::registry::{ConnectionHandle, ConnectionRegistry, UserId};
use crate::hub::transport::{fan_out, DeliveryReport, PushTransport};

/// Maximum message body length (chars).
pub const MAX_BODY_LENGTH: usize = 4000;

/// Lifecycle of one chat connection. `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticated,
    Active,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Authenticated => "authenticated",
            Self::Active => "active",
            Self::Disconnected => "disconnected",
        })
    }
}

/// One live chat connection, owned by its connection actor.
#[derive(Debug)]
pub struct ChatConnection {
    handle: ConnectionHandle,
    user: UserId,
    state: ConnectionState,
}

impl ChatConnection {
    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn transition(&mut self, next: ConnectionState) {
        tracing::trace!(
            handle = %self.handle,
            from = %self.state,
            to = %next,
            "Chat connection state change"
        );
        self.state = next;
    }
}

/// A chat message submitted over a connection.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub request_id: String,
    pub sender: UserId,
    pub session_id: ChatSessionId,
    pub body: String,
}

/// A persisted message and the outcome of its fan-out.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub message: Message,
    pub report: DeliveryReport,
}

#[derive(Clone)]
pub struct ChatHub {
    registry: ConnectionRegistry,
    store: Arc<dyn ChatStore>,
    transport: Arc<dyn PushTransport>,
}

impl ChatHub {
    pub fn new(
        registry: ConnectionRegistry,
        store: Arc<dyn ChatStore>,
        transport: Arc<dyn PushTransport>,
    ) -> Self {
        Self {
            registry,
            store,
            transport,
        }
    }

    /// Bind `handle` to an identity verified upstream and make it reachable.
    pub fn connect(&self, handle: ConnectionHandle, user: UserId) -> ChatConnection {
        let mut conn = ChatConnection {
            handle,
            user,
            state: ConnectionState::Connecting,
        };
        conn.transition(ConnectionState::Authenticated);
        self.registry.add(&conn.user, conn.handle);
        conn.transition(ConnectionState::Active);

        tracing::info!(user_id = %conn.user, handle = %handle, "Chat connection active");
        conn
    }

    /// Persist an inbound message and deliver it to the session.
    ///
    /// Any rejection is reported to the sending connection only; nothing is
    /// fanned out unless the message was stored.
    pub async fn send(
        &self,
        conn: &ChatConnection,
        inbound: InboundMessage,
    ) -> Result<Dispatched, HubError> {
        let request_id = inbound.request_id.clone();
        match self.persist(conn, inbound).await {
            Ok(stored) => {
                let report = self.dispatch(&stored).await;
                let message = stored.message;
                tracing::debug!(
                    user_id = %conn.user,
                    session_id = %message.session_id,
                    message_id = %message.id,
                    delivered = report.delivered,
                    failed = report.failed,
                    "Chat message dispatched"
                );
                Ok(Dispatched { message, report })
            }
            Err(err) => {
                tracing::warn!(
                    user_id = %conn.user,
                    handle = %conn.handle,
                    error = %err,
                    "Chat message rejected"
                );
                self.report_to_sender(conn, &request_id, &err).await;
                Err(err)
            }
        }
    }

    /// Deregister the connection. Repeated calls are a no-op.
    pub fn disconnect(&self, conn: &mut ChatConnection) {
        if conn.state == ConnectionState::Disconnected {
            return;
        }
        self.registry.remove(&conn.user, &conn.handle);
        conn.transition(ConnectionState::Disconnected);

        tracing::info!(user_id = %conn.user, handle = %conn.handle, "Chat connection closed");
    }

    async fn persist(
        &self,
        conn: &ChatConnection,
        inbound: InboundMessage,
    ) -> Result<StoredMessage, HubError> {
        if conn.state != ConnectionState::Active {
            return Err(AuthorizationError::NotActive(conn.state).into());
        }
        if inbound.sender != conn.user {
            return Err(AuthorizationError::SenderMismatch {
                bound: conn.user.clone(),
                claimed: inbound.sender,
            }
            .into());
        }

        let body = inbound.body.trim();
        if body.is_empty() {
            return Err(HubError::InvalidMessage("message body is empty".to_string()));
        }
        if body.chars().count() > MAX_BODY_LENGTH {
            return Err(HubError::InvalidMessage(format!(
                "message body exceeds {} characters",
                MAX_BODY_LENGTH
            )));
        }

        let stored = self
            .store
            .save(NewMessage {
                session_id: inbound.session_id,
                sender_id: inbound.sender,
                body: body.to_string(),
            })
            .await?;
        Ok(stored)
    }

    /// Push the stored message to every live chat connection of every participant.
    /// The sender is always included so its other tabs stay in sync.
    async fn dispatch(&self, stored: &StoredMessage) -> DeliveryReport {
        let recipients: BTreeSet<&UserId> = stored
            .participants
            .iter()
            .chain(std::iter::once(&stored.message.sender_id))
            .collect();

        let handles: Vec<ConnectionHandle> = recipients
            .into_iter()
            .flat_map(|user| self.registry.get_handles(user))
            .collect();

        let event = ServerEvent::Message {
            message: stored.message.clone(),
        };
        fan_out(self.transport.as_ref(), handles, &event).await
    }

    async fn report_to_sender(&self, conn: &ChatConnection, request_id: &str, err: &HubError) {
        let event = ServerEvent::Error {
            request_id: request_id.to_string(),
            code: err.code(),
            message: err.to_string(),
        };
        if let Err(e) = self.transport.push(&conn.handle, &event).await {
            tracing::debug!(handle = %conn.handle, error = %e, "Could not report error to sender");
        }
    }
}
