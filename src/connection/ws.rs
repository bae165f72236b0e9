//! Axum WebSocket upgrade handler for the client audio/control channel.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

use super::protocol::ClientMessage;
use super::ConnectionHub;
use crate::server::ServerState;

pub async fn audio_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub.clone()))
}

async fn handle_socket(socket: WebSocket, hub: Arc<ConnectionHub>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (client_id, mut outbound_rx) = hub.register().await;

    let egress = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let Ok(text) = serde_json::to_string(&message) else {
                continue;
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let ingest_hub = hub.clone();
    let ingest = tokio::spawn(async move {
        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(Message::Binary(bytes)) => {
                    ingest_hub.handle_binary_frame(client_id, bytes.to_vec()).await;
                }
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Heartbeat { .. }) => {
                        ingest_hub.handle_heartbeat(client_id).await;
                    }
                    Ok(ClientMessage::Config { payload, .. }) => {
                        debug!(client_id = %client_id, ?payload, "config message forwarded as event");
                    }
                    Err(err) => {
                        warn!(client_id = %client_id, error = %err, "malformed control message, dropping");
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!(client_id = %client_id, error = %err, "transport error, terminating session");
                    break;
                }
            }
        }
    });

    hub.attach_reader_task(client_id, ingest.abort_handle()).await;

    // Either side finishing ends the session; the other task is aborted so
    // neither lingers past the socket's lifetime.
    let mut ingest = ingest;
    let mut egress = egress;
    tokio::select! {
        _ = &mut ingest => { egress.abort(); }
        _ = &mut egress => { ingest.abort(); }
    }

    hub.unregister(client_id).await;
}
