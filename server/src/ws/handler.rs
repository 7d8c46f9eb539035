use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        State,
    },
    response::Response,
};

use crate::auth::jwt::{self, AuthError};
use crate::auth::middleware::AccessToken;
use crate::state::AppState;
use crate::ws::actor;

/// WebSocket close codes:
/// 4001 = token expired
/// 4002 = token missing or invalid
const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;

/// GET /chatHub
/// Chat endpoint. Authenticates the handshake, then spawns the chat actor.
pub async fn chat_hub(
    State(state): State<AppState>,
    AccessToken(token): AccessToken,
    ws: WebSocketUpgrade,
) -> Response {
    match jwt::authenticate(&state.jwt, token.as_deref()) {
        Ok(user) => {
            tracing::info!(user_id = %user, "Chat hub connection authenticated");
            ws.on_upgrade(move |socket| actor::run_chat_connection(socket, state, user))
        }
        Err(err) => reject(ws, err),
    }
}

/// GET /notificationHub
/// Notification endpoint (server → client only).
pub async fn notification_hub(
    State(state): State<AppState>,
    AccessToken(token): AccessToken,
    ws: WebSocketUpgrade,
) -> Response {
    match jwt::authenticate(&state.jwt, token.as_deref()) {
        Ok(user) => {
            tracing::info!(user_id = %user, "Notification hub connection authenticated");
            ws.on_upgrade(move |socket| actor::run_notification_connection(socket, state, user))
        }
        Err(err) => reject(ws, err),
    }
}

/// Upgrade the connection, then immediately close it with the code matching
/// the authentication failure.
fn reject(ws: WebSocketUpgrade, err: AuthError) -> Response {
    let (close_code, reason) = match err {
        AuthError::Expired => (CLOSE_TOKEN_EXPIRED, "Token expired"),
        AuthError::MissingToken | AuthError::Invalid(_) => (CLOSE_TOKEN_INVALID, "Token invalid"),
    };

    tracing::warn!(close_code = close_code, error = %err, "WebSocket auth failed");

    ws.on_upgrade(move |mut socket| async move {
        let close_frame = CloseFrame {
            code: close_code,
            reason: reason.into(),
        };
        let _ = socket.send(Message::Close(Some(close_frame))).await;
    })
}
