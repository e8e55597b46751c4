use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::time;
use tokio_tungstenite::{tungstenite, MaybeTlsStream, WebSocketStream};

use relay_api::config::Config;
use relay_api::db::messages::MemoryMessageStore;
use relay_api::db::users::MemoryUserStore;
use relay_api::AppState;

/// Secret shared by every test server; tests mint their own tokens with it.
pub const TEST_JWT_SECRET: &str = "relay-test-secret";

pub const TEST_PASSWORD: &str = "correct-horse-battery";

pub type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Build an `AppState` on in-memory stores.
pub fn test_state() -> AppState {
    let config = Config {
        database_url: "postgres://unused-in-tests".to_string(),
        jwt_secret: TEST_JWT_SECRET.to_string(),
        port: 0,
    };
    AppState::new(
        Arc::new(config),
        Arc::new(MemoryUserStore::new()),
        Arc::new(MemoryMessageStore::new()),
    )
}

/// Start a real TCP server for WebSocket testing. Returns (addr, state); the
/// server runs in the background.
pub async fn start_server() -> (SocketAddr, AppState) {
    let state = test_state();
    let app = relay_api::routes::router().with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

/// Register a user over HTTP. Returns (session token, user id).
pub async fn register_user(addr: SocketAddr, username: &str) -> (String, String) {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/api/v1/auth/register"))
        .json(&serde_json::json!({
            "username": username,
            "email": format!("{username}@example.com"),
            "password": TEST_PASSWORD,
        }))
        .send()
        .await
        .expect("register request");
    assert!(
        resp.status().is_success(),
        "register failed with {}",
        resp.status()
    );

    let body: serde_json::Value = resp.json().await.expect("parse register response");
    (
        body["token"].as_str().expect("token present").to_string(),
        body["user"]["id"]
            .as_str()
            .expect("user id present")
            .to_string(),
    )
}

/// Open a gateway WebSocket, optionally presenting a token at handshake time.
pub async fn connect_gateway(addr: SocketAddr, token: Option<&str>) -> WsClient {
    let url = match token {
        Some(token) => format!("ws://{addr}/gateway?token={token}"),
        None => format!("ws://{addr}/gateway"),
    };
    let (stream, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");
    stream
}

/// Read the next JSON event, skipping transport-level frames.
pub async fn next_event(ws: &mut WsClient) -> serde_json::Value {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for event")
            .expect("stream ended")
            .expect("ws read error");

        match msg {
            tungstenite::Message::Text(text) => {
                return serde_json::from_str(&text).expect("parse event")
            }
            tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Send one client event as JSON.
pub async fn send_json(ws: &mut WsClient, value: serde_json::Value) {
    ws.send(tungstenite::Message::Text(value.to_string().into()))
        .await
        .expect("ws send");
}

/// Assert the server closed the connection.
pub async fn expect_closed(ws: &mut WsClient) {
    let msg = time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timeout waiting for close");
    match msg {
        None | Some(Ok(tungstenite::Message::Close(_))) | Some(Err(_)) => {}
        Some(Ok(other)) => panic!("expected close, got {other:?}"),
    }
}

/// Assert no event arrives for a short window.
pub async fn assert_silent(ws: &mut WsClient) {
    let result = time::timeout(Duration::from_millis(250), ws.next()).await;
    assert!(result.is_err(), "expected no event, got {result:?}");
}
