//! WebSocket handler for real-time updates

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use super::AppState;

/// Connection-level frames. Activity events are sent in the same
/// `{type, data}` shape.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WsMessage {
    /// Sent once on connect
    Ping { timestamp: DateTime<Utc> },

    /// The client fell behind and missed events
    Lagged { skipped: u64 },
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

fn frame<T: Serialize>(msg: &T) -> Option<Message> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(Message::Text(json)),
        Err(e) => {
            error!("Failed to serialize WebSocket message: {}", e);
            None
        }
    }
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.subscribe_ws();

    info!(
        "New WebSocket client connected ({} subscribers)",
        state.feed.subscriber_count()
    );

    if let Some(hello) = frame(&WsMessage::Ping { timestamp: Utc::now() }) {
        let _ = sender.send(hello).await;
    }

    // Forward activity to this client
    let mut send_task = tokio::spawn(async move {
        loop {
            let message = match rx.recv().await {
                Ok(event) => frame(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("WebSocket client lagged, skipped {} events", skipped);
                    frame(&WsMessage::Lagged { skipped })
                }
                Err(RecvError::Closed) => break,
            };
            if let Some(message) = message {
                if sender.send(message).await.is_err() {
                    break;
                }
            }
        }
    });

    // Drain client frames until it goes away
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => debug!("Ignoring WebSocket message: {}", text),
                Ok(Message::Close(_)) => {
                    info!("WebSocket client disconnected");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("WebSocket connection closed");
}
