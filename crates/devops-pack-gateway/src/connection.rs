//! WebSocket connection lifecycle: greeting, read/write loops, cleanup.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use devops_pack_core::protocol::{ConnectInfo, EventFrame};

use crate::events::dispatch_event;
use crate::runner::OutputSink;
use crate::state::{ConnectionState, GatewayState};

/// Handle a new WebSocket connection.
pub async fn handle_ws_connection(state: Arc<GatewayState>, ws: WebSocket) {
    let conn_id = Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, "New WebSocket connection");

    let (mut ws_tx, mut ws_rx) = ws.split();

    // Everything bound for this client goes through one queue so that
    // output from concurrent runs never interleaves mid-frame.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<String>();

    {
        let mut connections = state.connections.write().await;
        connections.insert(conn_id.clone(), ConnectionState::default());
    }

    let sink = OutputSink::new(conn_id.clone(), event_tx);

    let hello = ConnectInfo {
        conn_id: conn_id.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    match EventFrame::connect(&hello) {
        Ok(frame) => sink.send_frame(&frame),
        Err(e) => warn!(conn_id = %conn_id, %e, "Failed to build connect frame"),
    }

    let send_task = tokio::spawn(async move {
        while let Some(msg) = event_rx.recv().await {
            if ws_tx.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg_result) = ws_rx.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match EventFrame::from_text(text.as_str()) {
                Ok(frame) => dispatch_event(&state, &sink, frame).await,
                Err(e) => {
                    warn!(conn_id = %conn_id, %e, "Invalid frame received");
                    sink.send_frame(&EventFrame::error(format!("Invalid frame: {e}")));
                }
            },
            Ok(Message::Close(_)) => {
                debug!(conn_id = %conn_id, "Client requested close");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(conn_id = %conn_id, %e, "WebSocket error");
                break;
            }
        }
    }

    send_task.abort();
    cleanup_connection(&state, &conn_id).await;
    info!(conn_id = %conn_id, "WebSocket connection closed");
}

async fn cleanup_connection(state: &Arc<GatewayState>, conn_id: &str) {
    let mut connections = state.connections.write().await;
    if let Some(mut conn) = connections.remove(conn_id) {
        let aborted = conn.abort_runs();
        if aborted > 0 {
            info!(conn_id = %conn_id, aborted, "Aborted runs for closed connection");
        }
    }
}
