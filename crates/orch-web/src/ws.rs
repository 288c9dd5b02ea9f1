//! WebSocket transport for the hub protocol.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, trace};

use crate::coordinator::RealtimeCoordinator;
use crate::state::WebState;

const PING_INTERVAL: Duration = Duration::from_secs(30);

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WebState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.coordinator))
}

/// Pump frames both ways until either side goes away, then drop the
/// connection from every group.
async fn handle_socket(socket: WebSocket, coordinator: Arc<RealtimeCoordinator>) {
    let (connection, mut rx) = coordinator.connect();
    let conn_id = connection.id.clone();
    info!(%conn_id, "hub client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_id = conn_id.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    let text = frame.as_ref().clone();
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    trace!(conn_id = %writer_id, "sent ping");
                }
            }
        }
    });

    let reader_hub = coordinator.clone();
    let reader_id = conn_id.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(message)) = ws_rx.next().await {
            match message {
                Message::Text(text) => reader_hub.handle_frame(&reader_id, text.as_str()),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    coordinator.disconnect(&conn_id);
    info!(%conn_id, dropped = connection.dropped(), "hub client disconnected");
}
