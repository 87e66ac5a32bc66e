//! WebSocket fan-out endpoint.

use agrigenie_realtime::{Connection, RealtimeMessage};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};

use crate::state::AppState;

/// WebSocket upgrade handler for subscriber connections
pub async fn ws_subscriber(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| handle_subscriber(socket, state, user_id))
}

/// Serve one subscriber socket until either side goes away.
///
/// The registry only sees the connection's outbound channel; a writer task
/// drains it onto the socket while the reader echoes incoming text frames
/// to every connection under the same key.
async fn handle_subscriber(socket: WebSocket, state: AppState, key: String) {
    let (connection, mut outbound) = Connection::channel(state.config.connection_buffer);
    let connection_id = connection.id();
    state.registry.accept(connection, &key);

    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode message");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let registry = state.registry.clone();
    let reader_key = key.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    registry
                        .broadcast(&reader_key, RealtimeMessage::Message { message: text })
                        .await;
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(key = %reader_key, "WebSocket error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    state.registry.remove(connection_id, &key);
    tracing::debug!(key = %key, %connection_id, "subscriber disconnected");
}
