//! Integration tests for the Socket.IO presence channel.
//!
//! These tests run a real websocket server on a random local port that
//! speaks just enough Engine.IO / Socket.IO to drive the client: handshake,
//! namespace connect, heartbeats and the roster event.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use quickchat_core::presence::PresenceHandle;
use quickchat_core::{
    PresenceConfig, PresenceConnector, PresenceEvent, ServerEvent, SocketConnector,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const OPEN_PACKET: &str =
    r#"0{"sid":"s1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;

type ServerWs = WebSocketStream<TcpStream>;

async fn bind() -> (TcpListener, url::Url) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("should bind");
    let addr = listener.local_addr().expect("should have address");
    let url = url::Url::parse(&format!("ws://{}", addr)).unwrap();
    (listener, url)
}

fn fast_reconnect(attempts: u32) -> PresenceConfig {
    PresenceConfig {
        enabled: true,
        reconnect_attempts: attempts,
        reconnect_delay_ms: 10,
        reconnect_delay_max_ms: 20,
    }
}

/// Accept one websocket connection, returning it with the request URI
async fn accept(listener: &TcpListener) -> (ServerWs, String) {
    let (stream, _) = listener.accept().await.expect("should accept");
    let uri = Arc::new(Mutex::new(String::new()));
    let seen = Arc::clone(&uri);
    let ws = tokio_tungstenite::accept_hdr_async(
        stream,
        move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            *seen.lock().unwrap() = req.uri().to_string();
            Ok(resp)
        },
    )
    .await
    .expect("handshake should succeed");
    let uri = uri.lock().unwrap().clone();
    (ws, uri)
}

/// Next text frame from the client, or None once it closes
async fn recv_text(ws: &mut ServerWs) -> Option<String> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for client");
        match msg {
            Some(Ok(Message::Text(text))) => return Some(text.as_str().to_string()),
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => continue,
        }
    }
}

async fn send_text(ws: &mut ServerWs, text: &str) {
    ws.send(Message::text(text)).await.expect("server send should succeed");
}

/// Engine.IO open, then accept the namespace connect
async fn handshake(ws: &mut ServerWs) {
    send_text(ws, OPEN_PACKET).await;
    assert_eq!(recv_text(ws).await.as_deref(), Some("40"));
    send_text(ws, r#"40{"sid":"n1"}"#).await;
}

async fn next_event(events: &mut mpsc::Receiver<PresenceEvent>) -> PresenceEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for presence event")
        .expect("event stream ended")
}

#[tokio::test]
async fn test_connect_roster_heartbeat_and_close() {
    let (listener, url) = bind().await;
    let connector = SocketConnector::new(url, PresenceConfig::default());

    let mut connection = connector.open("u1").expect("open should succeed");
    let (mut ws, uri) = accept(&listener).await;
    assert_eq!(uri, "/socket.io/?EIO=4&transport=websocket&userId=u1");

    handshake(&mut ws).await;
    assert_eq!(next_event(&mut connection.events).await, PresenceEvent::Connected);

    send_text(&mut ws, r#"42["getOnlineUsers",["u1","u2"]]"#).await;
    assert_eq!(
        next_event(&mut connection.events).await,
        PresenceEvent::Roster(vec!["u1".to_string(), "u2".to_string()])
    );

    // Other named events come through as-is
    send_text(&mut ws, r#"42["newMessage",{"text":"hi"}]"#).await;
    assert_eq!(
        next_event(&mut connection.events).await,
        PresenceEvent::Event(ServerEvent {
            name: "newMessage".to_string(),
            args: vec![serde_json::json!({"text": "hi"})],
        })
    );

    send_text(&mut ws, "2").await;
    assert_eq!(recv_text(&mut ws).await.as_deref(), Some("3"));

    send_text(&mut ws, r#"42["getOnlineUsers",["u3"]]"#).await;
    assert_eq!(
        next_event(&mut connection.events).await,
        PresenceEvent::Roster(vec!["u3".to_string()])
    );

    assert_eq!(connection.handle.identity(), "u1");
    assert!(!connection.handle.is_closed());
    connection.handle.close();
    assert!(connection.handle.is_closed());

    assert_eq!(recv_text(&mut ws).await.as_deref(), Some("41"));
    assert_eq!(recv_text(&mut ws).await, None);
}

#[tokio::test]
async fn test_connect_error_is_final() {
    let (listener, url) = bind().await;
    let connector = SocketConnector::new(url, fast_reconnect(5));

    let mut connection = connector.open("u1").expect("open should succeed");
    let (mut ws, _) = accept(&listener).await;

    send_text(&mut ws, OPEN_PACKET).await;
    assert_eq!(recv_text(&mut ws).await.as_deref(), Some("40"));
    send_text(&mut ws, r#"44{"message":"Not authorized"}"#).await;

    assert_eq!(
        next_event(&mut connection.events).await,
        PresenceEvent::ConnectError("Not authorized".to_string())
    );
    assert!(matches!(
        next_event(&mut connection.events).await,
        PresenceEvent::Disconnected { .. }
    ));

    // No reconnect after a refusal
    let retry = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
    assert!(retry.is_err(), "client should not reconnect after refusal");
}

#[tokio::test]
async fn test_lost_connection_reconnects() {
    let (listener, url) = bind().await;
    let connector = SocketConnector::new(url, fast_reconnect(3));

    let mut connection = connector.open("u1").expect("open should succeed");

    let (mut ws, _) = accept(&listener).await;
    handshake(&mut ws).await;
    assert_eq!(next_event(&mut connection.events).await, PresenceEvent::Connected);
    drop(ws);

    assert!(matches!(
        next_event(&mut connection.events).await,
        PresenceEvent::ConnectError(_)
    ));

    let (mut ws, uri) = accept(&listener).await;
    assert!(uri.ends_with("userId=u1"));
    handshake(&mut ws).await;
    assert_eq!(next_event(&mut connection.events).await, PresenceEvent::Connected);

    send_text(&mut ws, r#"42["getOnlineUsers",["u1"]]"#).await;
    assert_eq!(
        next_event(&mut connection.events).await,
        PresenceEvent::Roster(vec!["u1".to_string()])
    );
    connection.handle.close();
}

#[tokio::test]
async fn test_gives_up_after_reconnect_attempts() {
    // Bind and release a port so nothing is listening on it
    let (listener, url) = bind().await;
    drop(listener);
    let connector = SocketConnector::new(url, fast_reconnect(1));

    let mut connection = connector.open("u1").expect("open should succeed");

    assert!(matches!(
        next_event(&mut connection.events).await,
        PresenceEvent::ConnectError(_)
    ));
    assert!(matches!(
        next_event(&mut connection.events).await,
        PresenceEvent::ConnectError(_)
    ));
    assert!(matches!(
        next_event(&mut connection.events).await,
        PresenceEvent::Disconnected { .. }
    ));
    assert!(
        tokio::time::timeout(Duration::from_secs(2), connection.events.recv())
            .await
            .expect("stream should end")
            .is_none()
    );
}

#[tokio::test]
async fn test_server_disconnect_is_final() {
    let (listener, url) = bind().await;
    let connector = SocketConnector::new(url, fast_reconnect(5));

    let mut connection = connector.open("u1").expect("open should succeed");
    let (mut ws, _) = accept(&listener).await;
    handshake(&mut ws).await;
    assert_eq!(next_event(&mut connection.events).await, PresenceEvent::Connected);

    send_text(&mut ws, "41").await;
    assert!(matches!(
        next_event(&mut connection.events).await,
        PresenceEvent::Disconnected { .. }
    ));
}
