//! Push-stream connection handler
//!
//! Each stream client gets: one snapshot message on open, every store
//! notification as it is published, and a periodic heartbeat when the
//! connection is otherwise idle. Connections are independent; a slow
//! client only lags its own broadcast receiver.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::debug;

use super::http::AppState;
use crate::types::{HeartbeatMessage, SnapshotMessage, StreamMessage};

/// WebSocket upgrade handler for GET /api/stream
pub async fn stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one stream connection until the client goes away
async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    // Subscribe before snapshotting so nothing published in between is lost.
    let mut rx = state.stream_tx.subscribe();

    let initial = StreamMessage::Snapshot(SnapshotMessage::new(
        state.store.snapshot(),
        state.metrics.as_ref().map(|m| m.snapshot()),
    ));
    if send_message(&mut socket, &initial).await.is_err() {
        return; // Client disconnected immediately
    }

    let mut heartbeat = tokio::time::interval(state.stream_heartbeat);
    heartbeat.tick().await; // immediate first tick

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(message) => {
                        if send_message(&mut socket, &message).await.is_err() {
                            break; // Client disconnected
                        }
                        // Traffic counts as liveness; push the next
                        // heartbeat a full interval out.
                        heartbeat.reset();
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Client is too slow and missed events; tell it
                        // to refresh from the snapshot endpoint.
                        let advisory = serde_json::json!({
                            "type": "error",
                            "code": "lagged",
                            "message": format!("Missed {} events, refresh from snapshot", n)
                        });
                        let _ = socket.send(Message::Text(advisory.to_string())).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            _ = heartbeat.tick() => {
                let message = StreamMessage::Heartbeat(HeartbeatMessage::new(
                    Utc::now(),
                    state.metrics.as_ref().map(|m| m.snapshot()),
                ));
                if send_message(&mut socket, &message).await.is_err() {
                    break;
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        let _ = socket.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // Inbound text/binary ignored; this is a push stream
                    Some(Err(_)) => break,
                }
            }
        }
    }

    debug!("stream client disconnected");
    // rx and heartbeat drop here; per-connection teardown is implicit
    // and idempotent.
}

async fn send_message(socket: &mut WebSocket, message: &StreamMessage) -> Result<(), ()> {
    let json = serde_json::to_string(message).map_err(|_| ())?;
    socket.send(Message::Text(json)).await.map_err(|_| ())
}
