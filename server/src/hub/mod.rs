//! Real-time delivery core: the connection registry and the two hubs that
//! dispatch through it.

pub mod chat;
pub mod error;
pub mod event;
pub mod notification;
pub mod registry;
pub mod transport;

pub use chat::{ChatConnection, ChatHub, ConnectionState, Dispatched, InboundMessage};
pub use error::{AuthorizationError, HubError};
pub use event::ServerEvent;
pub use notification::{Notification, NotificationHub, NotificationKind};
pub use registry::{ConnectionHandle, ConnectionRegistry, UserId};
pub use transport::{fan_out, DeliveryError, DeliveryReport, PushTransport};
