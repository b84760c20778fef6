//! WebSocket handler for live UI updates
//!
//! Each connected client is registered with the broadcaster and receives
//! its typed frames as JSON text messages. Writes carry a deadline; a
//! socket that cannot keep up is dropped.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::{stream::StreamExt, SinkExt};
use tracing::{debug, info};

use crate::api::ApiState;

/// Per-write deadline for pushing a frame to a socket
const WRITE_DEADLINE: Duration = Duration::from_secs(5);

/// WebSocket upgrade handler
///
/// GET /api/v1/ws
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

/// Handle one WebSocket connection
async fn handle_websocket(socket: WebSocket, state: ApiState) {
    info!("WebSocket client connected");

    let (mut sender, mut receiver) = socket.split();
    let (subscriber_id, mut frames) = state.broadcaster.subscribe();

    // Forward broadcaster frames to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else {
                continue;
            };

            match tokio::time::timeout(WRITE_DEADLINE, sender.send(Message::Text(text))).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    debug!("WebSocket send failed, client disconnected");
                    break;
                }
                Err(_) => {
                    debug!("WebSocket write deadline exceeded, dropping client");
                    break;
                }
            }
        }
    });

    // Drain incoming messages to notice closes
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Close(_) => break,
                Message::Ping(_) => {
                    // pong is sent automatically by axum
                    debug!("received ping");
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    state.broadcaster.unsubscribe(subscriber_id);
    info!("WebSocket client disconnected");
}
