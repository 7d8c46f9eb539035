use thiserror::Error;

use crate::chat::StoreError;
use crate::hub::chat::ConnectionState;
use crate::hub::registry::UserId;

/// An inbound event the connection is not allowed to submit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorizationError {
    #[error("sender {claimed} does not match connection identity {bound}")]
    SenderMismatch { bound: UserId, claimed: UserId },

    #[error("connection is {0}, not active")]
    NotActive(ConnectionState),
}

/// Why an inbound chat message was not dispatched.
///
/// Delivery failures to individual connections are not errors at this level;
/// they are counted in the `DeliveryReport`.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("not authorized: {0}")]
    Authorization(#[from] AuthorizationError),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("failed to persist message: {0}")]
    Persistence(#[from] StoreError),
}

impl HubError {
    /// Status code reported to the client in an `error` event.
    pub fn code(&self) -> u16 {
        match self {
            Self::Authorization(_) => 403,
            Self::InvalidMessage(_) => 400,
            Self::Persistence(StoreError::SessionNotFound(_)) => 404,
            Self::Persistence(StoreError::NotParticipant { .. }) => 403,
            Self::Persistence(_) => 500,
        }
    }
}
