use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};

use crate::session::SessionManager;

/// Drive one socket: a writer draining the session's queue plus periodic
/// pings, a reader feeding frames to the manager. Either side ending closes
/// the session.
pub async fn handle_ws_connection(
    socket: WebSocket,
    manager: Arc<SessionManager>,
    heartbeat: Duration,
) {
    let (session_id, mut rx) = manager.on_connect();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_sid = session_id.clone();
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(session_id = %writer_sid, "sent ping");
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    let reader_sid = session_id.clone();
    let reader_manager = Arc::clone(&manager);
    let reader = tokio::spawn(async move {
        while let Some(frame) = ws_rx.next().await {
            let msg = match frame {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::debug!(session_id = %reader_sid, error = %e, "socket read failed");
                    break;
                }
            };
            match msg {
                WsMessage::Text(text) => {
                    let _ = reader_manager.on_message(&reader_sid, text.as_str().as_bytes());
                }
                WsMessage::Binary(bytes) => {
                    let _ = reader_manager.on_message(&reader_sid, &bytes);
                }
                WsMessage::Pong(_) => reader_manager.registry().record_pong(&reader_sid),
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) => {}
            }
        }
    });

    let writer_abort = writer.abort_handle();
    let reader_abort = reader.abort_handle();
    tokio::select! {
        _ = writer => reader_abort.abort(),
        _ = reader => writer_abort.abort(),
    }

    manager.on_disconnect(&session_id).await;
}
