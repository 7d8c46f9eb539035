use axum::extract::ws::Message;
use serde::Deserialize;

use crate::chat::ChatSessionId;
use crate::hub::chat::{ChatConnection, ChatHub, InboundMessage};
use crate::hub::event::ServerEvent;
use crate::hub::registry::UserId;
use crate::ws::ConnectionSender;

/// Frames a client may send on the chat endpoint.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    SendMessage {
        #[serde(default)]
        request_id: String,
        session_id: ChatSessionId,
        /// Defaults to the connection's own identity when omitted.
        #[serde(default)]
        sender_id: Option<UserId>,
        body: String,
    },
}

/// Handle an incoming text (JSON) frame on a chat connection.
pub async fn handle_chat_frame(
    text: &str,
    tx: &ConnectionSender,
    hub: &ChatHub,
    conn: &ChatConnection,
) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(
                user_id = %conn.user(),
                error = %e,
                "Failed to decode client frame"
            );
            send_error(tx, "", 400, "Invalid frame");
            return;
        }
    };

    match frame {
        ClientFrame::SendMessage {
            request_id,
            session_id,
            sender_id,
            body,
        } => {
            let inbound = InboundMessage {
                request_id: request_id.clone(),
                sender: sender_id.unwrap_or_else(|| conn.user().clone()),
                session_id,
                body,
            };
            // Rejections are reported to this connection by the hub itself.
            if let Ok(dispatched) = hub.send(conn, inbound).await {
                send_event(
                    tx,
                    &ServerEvent::Ack {
                        request_id,
                        message_id: dispatched.message.id,
                        delivered: dispatched.report.delivered,
                        failed: dispatched.report.failed,
                    },
                );
            }
        }
    }
}

/// Encode and send an event as a JSON text frame.
pub fn send_event(tx: &ConnectionSender, event: &ServerEvent) {
    if let Ok(text) = serde_json::to_string(event) {
        let _ = tx.send(Message::Text(text.into()));
    }
}

/// Send an error event.
pub fn send_error(tx: &ConnectionSender, request_id: &str, code: u16, message: &str) {
    send_event(
        tx,
        &ServerEvent::Error {
            request_id: request_id.to_string(),
            code,
            message: message.to_string(),
        },
    );
}
