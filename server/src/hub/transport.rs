//! Transport-agnostic push primitive and per-handle fan-out.

use async_trait::async_trait;
use futures_util::future::join_all;
use thiserror::Error;

use crate::hub::event::ServerEvent;
use crate::hub::registry::ConnectionHandle;

/// Failure to deliver one event to one connection.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("connection {0} is not attached to the transport")]
    Detached(ConnectionHandle),

    #[error("connection {0} is closed")]
    Closed(ConnectionHandle),

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Pushes an event to a single live connection.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn push(&self, handle: &ConnectionHandle, event: &ServerEvent)
        -> Result<(), DeliveryError>;
}

/// Outcome of delivering one logical event to a set of connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

impl DeliveryReport {
    pub fn merge(self, other: DeliveryReport) -> DeliveryReport {
        DeliveryReport {
            attempted: self.attempted + other.attempted,
            delivered: self.delivered + other.delivered,
            failed: self.failed + other.failed,
        }
    }
}

/// Push `event` to every handle independently.
///
/// All pushes are polled concurrently so a slow connection does not hold up
/// the others. Failures are logged and counted, never propagated.
pub async fn fan_out<I>(
    transport: &dyn PushTransport,
    handles: I,
    event: &ServerEvent,
) -> DeliveryReport
where
    I: IntoIterator<Item = ConnectionHandle>,
{
    let pushes = handles.into_iter().map(|handle| async move {
        let result = transport.push(&handle, event).await;
        (handle, result)
    });

    let mut report = DeliveryReport::default();
    for (handle, result) in join_all(pushes).await {
        report.attempted += 1;
        match result {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                report.failed += 1;
                tracing::warn!(
                    handle = %handle,
                    event = event.kind(),
                    error = %e,
                    "Delivery to connection failed"
                );
            }
        }
    }
    report
}
