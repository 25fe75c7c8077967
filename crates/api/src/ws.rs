use crate::registry::{Connection, ConnectionId, RegistryError, RegistryHandle};
use crate::state::AppState;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use quotefeed_core::{normalize_symbol, StreamMessage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Failures that end a single realtime connection.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Receive failed: {0}")]
    Receive(#[source] axum::Error),
    #[error("Send failed: {0}")]
    Send(#[source] axum::Error),
    #[error("Malformed client message: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("Could not encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let registry = state.registry.clone();
    let buffer = state.config.outbound_buffer;
    ws.on_upgrade(move |socket| handle_socket(socket, registry, buffer))
}

/// Drive one client: register it, pump outbound updates from its buffer into
/// the socket, and forward subscribe requests to the registry until either
/// side stops. The connection is unregistered on the way out.
async fn handle_socket(socket: WebSocket, registry: RegistryHandle, buffer: usize) {
    let (connection, outbound) = Connection::new(buffer);
    let id = connection.id;
    if registry.register(connection).await.is_err() {
        warn!(connection = %id, "Registry unavailable, dropping connection");
        return;
    }
    info!(connection = %id, "Client connected");

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_loop(sink, outbound));

    tokio::select! {
        result = read_loop(stream, &registry, id) => {
            if let Err(e) = result {
                debug!(connection = %id, error = %e, "Reader stopped");
            }
        }
        result = &mut writer => {
            if let Ok(Err(e)) = result {
                debug!(connection = %id, error = %e, "Writer stopped");
            }
        }
    }

    // Dropping the registry's sender lets a still-running writer finish.
    let _ = registry.unregister(id).await;
    if !writer.is_finished() {
        let _ = writer.await;
    }
    info!(connection = %id, "Client disconnected");
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    registry: &RegistryHandle,
    id: ConnectionId,
) -> Result<(), StreamError> {
    while let Some(frame) = stream.next().await {
        match frame.map_err(StreamError::Receive)? {
            Message::Text(text) => {
                let message: StreamMessage =
                    serde_json::from_str(text.as_str()).map_err(StreamError::Decode)?;
                match message.subscription_symbol() {
                    Some(symbol) => {
                        let symbol = normalize_symbol(symbol);
                        debug!(connection = %id, symbol = %symbol, "Subscribe");
                        registry.subscribe(id, &symbol).await?;
                    }
                    None => debug!(connection = %id, action = ?message.action, "Ignoring client message"),
                }
            }
            Message::Close(_) => break,
            // Ping/pong is answered by axum; binary frames carry nothing for us.
            _ => {}
        }
    }
    Ok(())
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<StreamMessage>,
) -> Result<(), StreamError> {
    while let Some(message) = outbound.recv().await {
        let json = serde_json::to_string(&message).map_err(StreamError::Encode)?;
        sink.send(Message::Text(json.into()))
            .await
            .map_err(StreamError::Send)?;
    }
    // Unregistered or evicted.
    let _ = sink.send(Message::Close(None)).await;
    Ok(())
}
