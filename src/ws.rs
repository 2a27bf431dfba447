//! WebSocket transport: connection lifecycle and the per-message relay

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::protocol::{ChatMessage, InboundPayload};
use crate::state::AppState;

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle an individual client connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = ulid::Ulid::new().to_string();
    let (mut sender, mut receiver) = socket.split();
    let mut broadcast_rx = state.broadcast.subscribe();

    tracing::info!(
        "client connected: {} ({} online)",
        connection_id,
        state.broadcast.receiver_count()
    );

    loop {
        tokio::select! {
            // Pump the shared broadcast stream to this client
            broadcast_msg = broadcast_rx.recv() => {
                match broadcast_msg {
                    Ok(msg) => {
                        if let Ok(json) = serde_json::to_string(&msg) {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            "client {} lagged, skipped {} messages",
                            connection_id,
                            skipped
                        );
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            // Handle inbound frames
            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<InboundPayload>(&text) {
                            Ok(payload) => {
                                // Each message relays in its own task so a slow
                                // completion call never blocks this connection loop
                                // or other clients.
                                tokio::spawn(relay_chat(
                                    state.clone(),
                                    connection_id.clone(),
                                    payload,
                                ));
                            }
                            Err(e) => {
                                tracing::error!(
                                    "unparseable payload from {}: {}",
                                    connection_id,
                                    e
                                );
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("websocket error for {}: {}", connection_id, e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    tracing::info!("client disconnected: {}", connection_id);
}

/// Relay one inbound message: broadcast the user turn, fetch the reply,
/// broadcast the bot turn. The two turns of one message stay ordered;
/// turns of concurrently handled messages may interleave.
pub async fn relay_chat(state: Arc<AppState>, connection_id: String, payload: InboundPayload) {
    let (text, mode) = payload.normalize();
    tracing::info!("user message [mode={}] from {}: {}", mode, connection_id, text);

    // Ignore send errors (no receivers connected is fine)
    let _ = state
        .broadcast
        .send(ChatMessage::user(&connection_id, text.clone()));

    let reply = state.completion.reply(&text, mode).await;

    let _ = state.broadcast.send(ChatMessage::bot(reply));
}
