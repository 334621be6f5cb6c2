//! WebSocket handler — one connection endpoint per accepted socket.
//!
//! DESIGN
//! ======
//! On upgrade, issues a connection id and enters a `select!` loop:
//! - Incoming client frames → decode + dispatch by message kind
//! - Queued outbound messages (responses, events) → write to the socket
//!
//! Requests are invoked in their own tasks and answer through the
//! connection's outbound channel, so a slow method never stalls the loop and
//! the socket has exactly one writer.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → attach connection → send module announcement event
//! 2. Client sends requests → spawn dispatch → response queued to sender
//! 3. Close or transport error → detach; in-flight responses are dropped

use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use frames::{CodecError, Kind, Message, decode_message, encode_message};
use tracing::{info, warn};
use uuid::Uuid;

use crate::invoker;
use crate::state::{AppState, ConnectionId};

/// Target name used for broker-originated events.
pub const BROKER_TARGET: &str = "broker";

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Ok(ws) = ws else {
        return not_implemented().await.into_response();
    };
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

/// Plain HTTP is not served.
pub async fn not_implemented() -> StatusCode {
    StatusCode::NOT_IMPLEMENTED
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();
    let mut client_rx = state.attach(client_id).await;

    info!(%client_id, "ws: client connected");

    let announce = Message::event(BROKER_TARGET, serde_json::json!(state.registry.module_names()));
    if send_message(&mut socket, &announce).await.is_err() {
        state.detach(client_id).await;
        return;
    }

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(%client_id, error = %e, "ws: transport error");
                        break;
                    }
                };
                match msg {
                    WsMessage::Text(text) => process_inbound_text(&state, client_id, text.as_str()),
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
            Some(message) = client_rx.recv() => {
                if send_message(&mut socket, &message).await.is_err() {
                    break;
                }
            }
        }
    }

    state.detach(client_id).await;
    info!(%client_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Decode one inbound text frame and act on it. Bad frames are logged and
/// dropped; the connection stays up.
fn process_inbound_text(state: &AppState, client_id: ConnectionId, text: &str) {
    let message = match decode_message(text) {
        Ok(message) => message,
        Err(CodecError::UnknownKind(kind)) => {
            warn!(%client_id, kind, "ws: unhandled message kind");
            return;
        }
        Err(e) => {
            warn!(%client_id, error = %e, "ws: invalid inbound frame");
            return;
        }
    };

    match message.kind {
        Kind::Request => {
            info!(%client_id, id = %message.id, module = %message.target, method = message.method_name(), "ws: recv request");
            let state = state.clone();
            tokio::spawn(async move {
                let response = invoker::dispatch(&state.registry, &message).await;
                state.send_to(client_id, response).await;
            });
        }
        Kind::Response => {
            warn!(%client_id, id = %message.id, "ws: response messages from clients are not handled");
        }
        Kind::Event => {
            warn!(%client_id, id = %message.id, "ws: event messages from clients are not handled");
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_message(socket: &mut WebSocket, message: &Message) -> Result<(), ()> {
    let json = match encode_message(message) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize message");
            return Err(());
        }
    };
    info!(id = %message.id, request_id = message.request_id.as_deref().unwrap_or("-"), kind = ?message.kind, "ws: send message");
    socket
        .send(WsMessage::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
