//! Notification hub: online-only delivery of booking, payment and moderation
//! events to a user's live connections. There is no queue and no retry; a
//! user with no live connection never sees the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::hub::event::ServerEvent;
use crate::hub::registry::{ConnectionHandle, ConnectionRegistry, UserId};
use crate::hub::transport::{fan_out, DeliveryReport, PushTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BookingUpdate,
    PaymentResult,
    PropertyViolation,
    Review,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    /// Producer-defined details (booking id, amount, ...).
    #[serde(default)]
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: NotificationKind, title: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            title: title.into(),
            data,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct NotificationHub {
    registry: ConnectionRegistry,
    transport: Arc<dyn PushTransport>,
}

impl NotificationHub {
    pub fn new(registry: ConnectionRegistry, transport: Arc<dyn PushTransport>) -> Self {
        Self {
            registry,
            transport,
        }
    }

    /// Register a receive-only notification connection.
    pub fn connect(&self, handle: ConnectionHandle, user: &UserId) {
        self.registry.add(user, handle);
        tracing::info!(user_id = %user, handle = %handle, "Notification connection active");
    }

    pub fn disconnect(&self, handle: &ConnectionHandle, user: &UserId) {
        self.registry.remove(user, handle);
        tracing::info!(user_id = %user, handle = %handle, "Notification connection closed");
    }

    pub fn is_online(&self, user: &UserId) -> bool {
        self.registry.is_online(user)
    }

    /// Push `notification` to every live notification connection of `user`.
    ///
    /// An offline user is not an error: the event is dropped and nothing is
    /// attempted.
    pub async fn notify(&self, user: &UserId, notification: &Notification) -> DeliveryReport {
        let handles = self.registry.get_handles(user);
        if handles.is_empty() {
            tracing::debug!(
                user_id = %user,
                notification_id = %notification.id,
                "User offline, notification dropped"
            );
            return DeliveryReport::default();
        }

        let event = ServerEvent::Notification {
            notification: notification.clone(),
        };
        let report = fan_out(self.transport.as_ref(), handles, &event).await;

        tracing::debug!(
            user_id = %user,
            notification_id = %notification.id,
            kind = ?notification.kind,
            delivered = report.delivered,
            failed = report.failed,
            "Notification dispatched"
        );
        report
    }

    /// Notify several users (e.g. guest and host of a booking) with the same event.
    pub async fn notify_many<'a, I>(&self, users: I, notification: &Notification) -> DeliveryReport
    where
        I: IntoIterator<Item = &'a UserId>,
    {
        let users: BTreeSet<&UserId> = users.into_iter().collect();
        let mut report = DeliveryReport::default();
        for user in users {
            report = report.merge(self.notify(user, notification).await);
        }
        report
    }
}
