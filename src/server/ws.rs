//! WebSocket client lifecycle

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};

use super::registry::ClientConnection;
use super::routes::AppState;

/// Accept the upgrade only once the wallet is ready.
pub fn upgrade(ws: WebSocketUpgrade, state: AppState) -> Response {
    if !state.readiness.is_ready() {
        tracing::warn!(state = state.readiness.current().as_str(), "refusing client before wallet is ready");
        return (StatusCode::SERVICE_UNAVAILABLE, "wallet initialization incomplete").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let ClientConnection { id, mut outbound } = state.registry.on_connect(&state.refresh);
    tracing::info!(id, live = state.registry.live_count(), "client connected");

    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if let Err(e) = sink.send(Message::Text(text)).await {
                tracing::debug!(id, error = %e, "send failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => tracing::info!(id, "received: {}", text),
                Some(Ok(Message::Binary(bytes))) => tracing::info!(id, len = bytes.len(), "received binary message"),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(id, error = %e, "client socket error");
                    break;
                }
            },
            // Writer ends when a send fails or the registry dropped this connection.
            _ = &mut writer => break,
        }
    }

    state.registry.on_disconnect(id);
    writer.abort();
    tracing::info!(id, live = state.registry.live_count(), "client disconnected");
}
