use serde::{Deserialize, Serialize};

use crate::chat::Message;
use crate::hub::notification::Notification;

/// Outbound payload pushed to a live connection.
///
/// Serialized as a JSON object tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A chat message persisted in one of the recipient's sessions.
    Message { message: Message },
    Notification { notification: Notification },
    /// Reply to the sender once its message has been stored and dispatched.
    Ack {
        request_id: String,
        message_id: String,
        delivered: usize,
        failed: usize,
    },
    Error {
        request_id: String,
        code: u16,
        message: String,
    },
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::Notification { .. } => "notification",
            Self::Ack { .. } => "ack",
            Self::Error { .. } => "error",
        }
    }
}
