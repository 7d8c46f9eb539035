use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};

use crate::config::KeepaliveConfig;
use crate::hub::registry::{ConnectionHandle, UserId};
use crate::state::AppState;
use crate::ws::protocol;
use crate::ws::ConnectionSender;

/// Ping cadence of a connection actor. A peer that misses a pong is treated
/// as gone and deregistered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&KeepaliveConfig> for Keepalive {
    fn from(config: &KeepaliveConfig) -> Self {
        Self {
            ping_interval: Duration::from_secs(config.ping_interval_secs.max(1)),
            pong_timeout: Duration::from_secs(config.pong_timeout_secs.max(1)),
        }
    }
}

/// Run the actor for an authenticated chat connection.
///
/// Registers the connection with the transport and the chat hub, feeds every
/// inbound text frame to the hub, and deregisters on exit.
pub async fn run_chat_connection(socket: WebSocket, state: AppState, user: UserId) {
    let mut io = ConnectionIo::start(socket, &state);
    let mut conn = state.chat_hub.connect(io.handle, user);

    while let Some(text) = io.next_text(conn.user()).await {
        protocol::handle_chat_frame(&text, &io.tx, &state.chat_hub, &conn).await;
    }

    state.chat_hub.disconnect(&mut conn);
    io.stop(&state);
}

/// Run the actor for an authenticated notification connection.
///
/// The connection is receive-only: inbound text frames are ignored.
pub async fn run_notification_connection(socket: WebSocket, state: AppState, user: UserId) {
    let mut io = ConnectionIo::start(socket, &state);
    state.notification_hub.connect(io.handle, &user);

    while let Some(text) = io.next_text(&user).await {
        tracing::debug!(
            user_id = %user,
            "Ignoring frame on notification connection: {}",
            text.chars().take(100).collect::<String>()
        );
    }

    state.notification_hub.disconnect(&io.handle, &user);
    io.stop(&state);
}

/// The socket plumbing shared by both hubs: a writer task owning the sink,
/// a ping task, and the reader half.
struct ConnectionIo {
    handle: ConnectionHandle,
    tx: ConnectionSender,
    pong_tx: mpsc::UnboundedSender<()>,
    /// Fires (or drops) once the ping task has given up on the peer.
    dead_rx: oneshot::Receiver<()>,
    reader: SplitStream<WebSocket>,
    writer: JoinHandle<()>,
    pinger: JoinHandle<()>,
}

impl ConnectionIo {
    fn start(socket: WebSocket, state: &AppState) -> Self {
        let (ws_sender, reader) = socket.split();
        let (tx, rx) = mpsc::unbounded_channel::<Message>();
        let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
        let (dead_tx, dead_rx) = oneshot::channel::<()>();

        let handle = ConnectionHandle::generate();
        state.transport.attach(handle, tx.clone());

        let writer = tokio::spawn(writer_task(ws_sender, rx));
        let pinger = tokio::spawn(ping_task(tx.clone(), pong_rx, state.keepalive, dead_tx));

        Self {
            handle,
            tx,
            pong_tx,
            dead_rx,
            reader,
            writer,
            pinger,
        }
    }

    /// Wait for the next text frame, answering control frames on the way.
    /// Returns `None` once the connection is closed, broken or unresponsive.
    async fn next_text(&mut self, user: &UserId) -> Option<String> {
        loop {
            let next = tokio::select! {
                _ = &mut self.dead_rx => {
                    tracing::info!(user_id = %user, "Peer unresponsive, dropping connection");
                    return None;
                }
                next = self.reader.next() => next,
            };

            match next {
                Some(Ok(msg)) => match msg {
                    Message::Text(text) => return Some(text.to_string()),
                    Message::Binary(_) => {
                        tracing::debug!(
                            user_id = %user,
                            "Received binary frame (expected JSON text)"
                        );
                    }
                    Message::Pong(_) => {
                        let _ = self.pong_tx.send(());
                    }
                    Message::Ping(data) => {
                        let _ = self.tx.send(Message::Pong(data));
                    }
                    Message::Close(frame) => {
                        tracing::info!(user_id = %user, reason = ?frame, "Client initiated close");
                        return None;
                    }
                },
                Some(Err(e)) => {
                    tracing::warn!(user_id = %user, error = %e, "WebSocket receive error");
                    return None;
                }
                None => {
                    tracing::info!(user_id = %user, "WebSocket stream ended");
                    return None;
                }
            }
        }
    }

    fn stop(self, state: &AppState) {
        self.writer.abort();
        self.pinger.abort();
        state.transport.detach(&self.handle);
    }
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            break;
        }
    }
}

/// Ping task: sends periodic pings and, when a pong does not arrive in time,
/// queues a Close and tells the reader loop to stop.
async fn ping_task(
    tx: ConnectionSender,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
    keepalive: Keepalive,
    dead_tx: oneshot::Sender<()>,
) {
    let mut ping_timer = interval(keepalive.ping_interval);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        // Only a pong that answers this ping counts.
        while pong_rx.try_recv().is_ok() {}

        if tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
            // Writer task has died, connection is gone
            break;
        }

        match timeout(keepalive.pong_timeout, pong_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                tracing::warn!("Pong timeout, closing connection");
                let _ = tx.send(Message::Close(Some(CloseFrame {
                    code: 1001,
                    reason: "Pong timeout".into(),
                })));
                break;
            }
        }
    }

    let _ = dead_tx.send(());
}
