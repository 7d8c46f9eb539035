//! Integration tests for the hub endpoints: handshake auth, chat delivery,
//! notifications and connection cleanup over real WebSockets.

use booking_server::auth::jwt::{Claims, JwtSettings};
use booking_server::chat::ChatSessionId;
use booking_server::config::{CorsConfig, RateLimitConfig};
use booking_server::hub::{ConnectionRegistry, Notification, NotificationKind, UserId};
use booking_server::state::AppState;
use booking_server::ws::actor::Keepalive;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const TEST_KEY: [u8; 32] = [42u8; 32];

fn jwt_settings() -> JwtSettings {
    JwtSettings {
        issuer: "booking-platform".to_string(),
        audience: "booking-clients".to_string(),
        key: TEST_KEY.to_vec(),
    }
}

/// Mint an access token for `user` that expires `exp_offset` seconds from now.
fn mint_token(user: &str, exp_offset: i64) -> String {
    let settings = jwt_settings();
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user.to_string(),
        iss: settings.issuer,
        aud: settings.audience,
        iat: now,
        exp: now + exp_offset,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(&TEST_KEY)).unwrap()
}

/// Helper: start the server on a random port and return (state, base_url, addr).
async fn start_test_server() -> (AppState, String, SocketAddr) {
    start_test_server_with(Keepalive::default()).await
}

async fn start_test_server_with(keepalive: Keepalive) -> (AppState, String, SocketAddr) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = booking_server::db::init_db(&data_dir).expect("Failed to init DB");
    let state = AppState::new(db, jwt_settings()).with_keepalive(keepalive);

    let app = booking_server::routes::build_router(
        state.clone(),
        &CorsConfig::default(),
        &RateLimitConfig::default(),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    (state, format!("http://{}", addr), addr)
}

async fn connect(addr: SocketAddr, hub: &str, token: &str) -> WsStream {
    let ws_url = format!("ws://{}/{}?access_token={}", addr, hub, token);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

/// The actor registers right after the upgrade; wait until it has.
async fn wait_for_connections(registry: &ConnectionRegistry, user: &str, count: usize) {
    let user = UserId::from(user);
    for _ in 0..100 {
        if registry.get_handles(&user).len() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("{} never reached {} connections", user, count);
}

/// Read frames until the next JSON text frame.
async fn next_event(ws: &mut WsStream) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("Expected a frame within timeout")
            .expect("Stream ended")
            .expect("WebSocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("Expected text frame, got: {:?}", other),
        }
    }
}

async fn assert_closed_with(ws: &mut WsStream, code: u16) {
    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("Expected close message within timeout");
    match msg {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(frame.code, CloseCode::from(code));
        }
        other => panic!("Expected close frame {}, got: {:?}", code, other),
    }
}

async fn send_chat(ws: &mut WsStream, frame: serde_json::Value) {
    ws.send(Message::text(frame.to_string()))
        .await
        .expect("Failed to send frame");
}

#[tokio::test]
async fn test_chat_connection_with_valid_token() {
    let (state, _base_url, addr) = start_test_server().await;
    let mut ws = connect(addr, "chatHub", &mint_token("guest-1", 900)).await;

    wait_for_connections(&state.chat_registry, "guest-1", 1).await;

    // Nothing is pushed until something happens.
    let result = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(result.is_err(), "Expected no frames on an idle connection");
}

#[tokio::test]
async fn test_expired_token_closes_with_4001() {
    let (state, _base_url, addr) = start_test_server().await;
    let mut ws = connect(addr, "chatHub", &mint_token("guest-1", -3600)).await;

    assert_closed_with(&mut ws, 4001).await;
    assert!(!state.chat_registry.is_online(&UserId::from("guest-1")));
}

#[tokio::test]
async fn test_invalid_token_closes_with_4002() {
    let (_state, _base_url, addr) = start_test_server().await;
    let mut ws = connect(addr, "notificationHub", "not-a-jwt").await;

    assert_closed_with(&mut ws, 4002).await;
}

#[tokio::test]
async fn test_missing_token_closes_with_4002() {
    let (_state, _base_url, addr) = start_test_server().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/chatHub", addr))
        .await
        .expect("WebSocket should upgrade even without a token");

    assert_closed_with(&mut ws, 4002).await;
}

#[tokio::test]
async fn test_message_delivered_to_participant_and_acked() {
    let (state, _base_url, addr) = start_test_server().await;
    let session = state
        .chat_store
        .create_session(&[UserId::from("guest"), UserId::from("host")], Some("villa-7"))
        .await
        .unwrap();

    let mut guest = connect(addr, "chatHub", &mint_token("guest", 900)).await;
    let mut host = connect(addr, "chatHub", &mint_token("host", 900)).await;
    wait_for_connections(&state.chat_registry, "guest", 1).await;
    wait_for_connections(&state.chat_registry, "host", 1).await;

    send_chat(
        &mut guest,
        json!({
            "type": "send_message",
            "request_id": "r-1",
            "session_id": session.id,
            "body": "Hi! Is early check-in possible?",
        }),
    )
    .await;

    let delivered = next_event(&mut host).await;
    assert_eq!(delivered["type"], "message");
    assert_eq!(delivered["message"]["sender_id"], "guest");
    assert_eq!(delivered["message"]["body"], "Hi! Is early check-in possible?");

    // The sender sees its own message, then the acknowledgement.
    let echo = next_event(&mut guest).await;
    assert_eq!(echo["type"], "message");
    assert_eq!(echo["message"]["id"], delivered["message"]["id"]);

    let ack = next_event(&mut guest).await;
    assert_eq!(ack["type"], "ack");
    assert_eq!(ack["request_id"], "r-1");
    assert_eq!(ack["message_id"], delivered["message"]["id"]);
    assert_eq!(ack["delivered"], 2);
    assert_eq!(ack["failed"], 0);

    let history = state.chat_store.recent_messages(&session.id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].body, "Hi! Is early check-in possible?");
}

#[tokio::test]
async fn test_spoofed_sender_is_rejected() {
    let (state, _base_url, addr) = start_test_server().await;
    let session = state
        .chat_store
        .create_session(&[UserId::from("guest"), UserId::from("host")], None)
        .await
        .unwrap();

    let mut guest = connect(addr, "chatHub", &mint_token("guest", 900)).await;
    wait_for_connections(&state.chat_registry, "guest", 1).await;

    send_chat(
        &mut guest,
        json!({
            "type": "send_message",
            "request_id": "r-2",
            "session_id": session.id,
            "sender_id": "host",
            "body": "I am the host, honest",
        }),
    )
    .await;

    let error = next_event(&mut guest).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["request_id"], "r-2");
    assert_eq!(error["code"], 403);

    let history = state.chat_store.recent_messages(&session.id, 10).await.unwrap();
    assert!(history.is_empty());
}

#[tokio::test]
async fn test_unknown_session_and_bad_frames_report_errors() {
    let (state, _base_url, addr) = start_test_server().await;
    let mut guest = connect(addr, "chatHub", &mint_token("guest", 900)).await;
    wait_for_connections(&state.chat_registry, "guest", 1).await;

    send_chat(
        &mut guest,
        json!({
            "type": "send_message",
            "request_id": "r-3",
            "session_id": ChatSessionId::new("no-such-session"),
            "body": "hello?",
        }),
    )
    .await;
    let error = next_event(&mut guest).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], 404);

    guest
        .send(Message::text("{not json"))
        .await
        .expect("Failed to send frame");
    let error = next_event(&mut guest).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], 400);
}

#[tokio::test]
async fn test_notification_reaches_every_connection() {
    let (state, _base_url, addr) = start_test_server().await;
    let token = mint_token("host", 900);
    let mut phone = connect(addr, "notificationHub", &token).await;
    let mut laptop = connect(addr, "notificationHub", &token).await;
    wait_for_connections(&state.notification_registry, "host", 2).await;

    let notification = Notification::new(
        NotificationKind::BookingUpdate,
        "New booking request",
        json!({ "booking_id": "b-17" }),
    );
    let report = state
        .notification_hub
        .notify(&UserId::from("host"), &notification)
        .await;
    assert_eq!(report.delivered, 2);

    for ws in [&mut phone, &mut laptop] {
        let event = next_event(ws).await;
        assert_eq!(event["type"], "notification");
        assert_eq!(event["notification"]["kind"], "booking_update");
        assert_eq!(event["notification"]["data"]["booking_id"], "b-17");
    }
}

#[tokio::test]
async fn test_disconnect_deregisters_user() {
    let (state, _base_url, addr) = start_test_server().await;
    let mut ws = connect(addr, "notificationHub", &mint_token("guest", 900)).await;
    wait_for_connections(&state.notification_registry, "guest", 1).await;

    ws.send(Message::Close(None)).await.expect("Failed to send close");
    wait_for_connections(&state.notification_registry, "guest", 0).await;

    let notification =
        Notification::new(NotificationKind::System, "Maintenance tonight", json!({}));
    let report = state
        .notification_hub
        .notify(&UserId::from("guest"), &notification)
        .await;
    assert_eq!(report.attempted, 0);
}

#[tokio::test]
async fn test_client_ping_gets_pong() {
    let (state, _base_url, addr) = start_test_server().await;
    let mut ws = connect(addr, "chatHub", &mint_token("guest", 900)).await;
    wait_for_connections(&state.chat_registry, "guest", 1).await;

    ws.send(Message::Ping(vec![42, 43, 44].into()))
        .await
        .expect("Failed to send ping");

    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("Expected pong within timeout");
    match msg {
        Some(Ok(Message::Pong(data))) => assert_eq!(data.as_ref(), &[42, 43, 44]),
        other => panic!("Expected Pong message, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_health_reports_connections_and_cors() {
    let (state, base_url, addr) = start_test_server().await;
    let _ws = connect(addr, "chatHub", &mint_token("guest", 900)).await;
    wait_for_connections(&state.chat_registry, "guest", 1).await;

    let resp = reqwest::Client::new()
        .get(format!("{}/health", base_url))
        .header("Origin", "https://stays.example")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()["access-control-allow-origin"],
        "https://stays.example"
    );
    assert_eq!(resp.headers()["access-control-allow-credentials"], "true");

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["chat"]["online_users"], 1);
    assert_eq!(body["chat"]["connections"], 1);
    assert_eq!(body["notifications"]["connections"], 0);
}

#[tokio::test]
async fn test_each_endpoint_receives_only_its_own_events() {
    let (state, _base_url, addr) = start_test_server().await;
    let session = state
        .chat_store
        .create_session(&[UserId::from("guest"), UserId::from("host")], None)
        .await
        .unwrap();

    let host_token = mint_token("host", 900);
    let mut host_chat = connect(addr, "chatHub", &host_token).await;
    let mut host_notifications = connect(addr, "notificationHub", &host_token).await;
    let mut guest = connect(addr, "chatHub", &mint_token("guest", 900)).await;
    wait_for_connections(&state.chat_registry, "host", 1).await;
    wait_for_connections(&state.notification_registry, "host", 1).await;
    wait_for_connections(&state.chat_registry, "guest", 1).await;

    send_chat(
        &mut guest,
        json!({
            "type": "send_message",
            "request_id": "r-9",
            "session_id": session.id,
            "body": "Checking in at noon",
        }),
    )
    .await;
    assert_eq!(next_event(&mut host_chat).await["type"], "message");
    assert_eq!(next_event(&mut guest).await["type"], "message");
    let ack = next_event(&mut guest).await;
    assert_eq!(ack["delivered"], 2);

    let notification = Notification::new(
        NotificationKind::PaymentResult,
        "Payment received",
        json!({ "booking_id": "b-3" }),
    );
    let report = state
        .notification_hub
        .notify(&UserId::from("host"), &notification)
        .await;
    assert_eq!(report.attempted, 1);

    // The notification socket sees only the notification, the chat socket nothing more.
    let event = next_event(&mut host_notifications).await;
    assert_eq!(event["type"], "notification");
    assert_eq!(event["notification"]["title"], "Payment received");

    let extra = tokio::time::timeout(Duration::from_millis(300), host_chat.next()).await;
    assert!(extra.is_err(), "Chat socket received an extra frame: {:?}", extra);
    let extra = tokio::time::timeout(Duration::from_millis(300), host_notifications.next()).await;
    assert!(extra.is_err(), "Notification socket received an extra frame: {:?}", extra);
}

#[tokio::test]
async fn test_unresponsive_peer_is_deregistered() {
    let (state, _base_url, addr) = start_test_server_with(Keepalive {
        ping_interval: Duration::from_millis(200),
        pong_timeout: Duration::from_millis(200),
    })
    .await;

    // The client never polls its stream, so the server's ping is never answered.
    let _silent = connect(addr, "notificationHub", &mint_token("guest", 900)).await;
    wait_for_connections(&state.notification_registry, "guest", 1).await;

    wait_for_connections(&state.notification_registry, "guest", 0).await;
    let report = state
        .notification_hub
        .notify(
            &UserId::from("guest"),
            &Notification::new(NotificationKind::System, "Anyone there?", json!({})),
        )
        .await;
    assert_eq!(report.attempted, 0);
}
