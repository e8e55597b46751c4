//! WebSocket upgrade handler and per-connection lifecycle.
//!
//! Each connection walks Connecting → Authenticating → Active → Closed:
//! authentication must succeed before anything touches the presence
//! registry, and deregistration happens exactly once on the way out.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::AppState;

use super::events::{ClientEvent, ServerEvent};
use super::handler;
use super::pipeline::SubmitError;
use super::session::ChatSession;

/// Close codes (4000-range for application-level).
const CLOSE_UNKNOWN_ERROR: u16 = 4000;
const CLOSE_AUTH_FAILED: u16 = 4004;

#[derive(Debug, Deserialize)]
struct ConnectParams {
    /// The session token, presented exactly once at handshake time.
    token: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, params.token))
}

async fn handle_connection(socket: WebSocket, state: AppState, token: Option<String>) {
    let (mut ws_tx, ws_rx) = socket.split();

    // Authenticating: no registry state exists until this succeeds.
    let identity = match handler::authenticate(&state, token.as_deref()).await {
        Ok(identity) => identity,
        Err(err) => {
            tracing::debug!(%err, "gateway authentication failed");
            let event = ServerEvent::AuthError {
                reason: err.reason().to_string(),
            };
            let json = serde_json::to_string(&event).unwrap();
            let _ = ws_tx.send(Message::Text(json.into())).await;
            let _ = send_close(&mut ws_tx, CLOSE_AUTH_FAILED, err.reason()).await;
            return;
        }
    };

    // Active: register, announce the new presence snapshot to everyone
    // (including this connection), then run the event loop.
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let session = ChatSession::new(identity, outbound_tx);

    tracing::info!(
        connection_id = %session.connection_id,
        user_id = %session.identity.id,
        display_name = %session.identity.display_name,
        "gateway connection established"
    );

    state.registry.register(
        session.connection_id.clone(),
        session.identity.clone(),
        session.handle(),
    );
    state.router.broadcast(ServerEvent::PresenceUpdate {
        online: state.registry.snapshot(),
    });

    run_session(&state, &session, ws_tx, ws_rx, outbound_rx).await;

    // Closed: deregistration is idempotent (the router may already have
    // dropped this connection's dead queue), and the departure announcement
    // always comes from here, once per connection.
    state.registry.deregister(&session.connection_id);
    state.router.broadcast(ServerEvent::PresenceUpdate {
        online: state.registry.snapshot(),
    });

    tracing::info!(
        connection_id = %session.connection_id,
        user_id = %session.identity.id,
        "gateway connection closed"
    );
}

/// Main event loop: forward queued broadcasts to the socket, route inbound
/// client events. Returning from here is the one way into Closed.
async fn run_session(
    state: &AppState,
    session: &ChatSession,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut ws_rx: SplitStream<WebSocket>,
    mut outbound_rx: mpsc::UnboundedReceiver<Arc<ServerEvent>>,
) {
    let mut typing = false;

    loop {
        tokio::select! {
            // An event queued for this connection by the broadcast router
            // (or by the session itself).
            event = outbound_rx.recv() => {
                let Some(event) = event else { break };
                let json = serde_json::to_string(event.as_ref()).unwrap();
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }

            // The client sends us something.
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let event: ClientEvent = match serde_json::from_str(&text) {
                            Ok(event) => event,
                            Err(_) => {
                                let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Invalid JSON").await;
                                break;
                            }
                        };
                        handle_client_event(state, session, event, &mut typing).await;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!(?err, connection_id = %session.connection_id, "ws read error");
                        break;
                    }
                    _ => continue,
                }
            }
        }
    }
}

async fn handle_client_event(
    state: &AppState,
    session: &ChatSession,
    event: ClientEvent,
    typing: &mut bool,
) {
    let display_name = session.identity.display_name.as_str();

    match event {
        ClientEvent::SendMessage { content } => {
            // A sent message implies the author stopped typing, whether or
            // not the client also says so.
            if *typing {
                *typing = false;
                state.router.broadcast_except(
                    ServerEvent::user_stop_typing(display_name),
                    &session.connection_id,
                );
            }

            match state.pipeline.submit(&content, session).await {
                Ok(_) => {}
                Err(SubmitError::Validation(err)) => {
                    session.notify(ServerEvent::error(err.to_string()));
                }
                Err(SubmitError::Persistence) => {
                    session.notify(ServerEvent::error("Failed to send message"));
                }
            }
        }
        ClientEvent::Typing => {
            *typing = true;
            state.router.broadcast_except(
                ServerEvent::user_typing(display_name),
                &session.connection_id,
            );
        }
        ClientEvent::StopTyping => {
            *typing = false;
            state.router.broadcast_except(
                ServerEvent::user_stop_typing(display_name),
                &session.connection_id,
            );
        }
    }
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
