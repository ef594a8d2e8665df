//! Event channel: one WebSocket carrying named events in both directions.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use devops_pack_core::error::{DevopsPackError, Result};
use devops_pack_core::protocol::EventFrame;

/// Callback invoked with the payload of each matching inbound event.
pub type EventHandler = Arc<dyn Fn(Option<&serde_json::Value>) + Send + Sync>;

#[derive(Default)]
struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Vec<EventHandler>>>,
}

impl HandlerRegistry {
    fn register(&self, event: &str, handler: EventHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }

    fn handlers_for(&self, event: &str) -> Vec<EventHandler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .cloned()
            .unwrap_or_default()
    }

    /// Run every handler registered for the frame's event, in registration order.
    fn dispatch(&self, frame: &EventFrame) {
        let handlers = self.handlers_for(&frame.event);
        if handlers.is_empty() {
            debug!(event = %frame.event, "No handler for event");
            return;
        }
        for handler in handlers {
            handler(frame.data.as_ref());
        }
    }
}

/// An open event connection to the gateway.
///
/// Inbound frames are dispatched by a single reader task, so handlers see
/// events strictly in arrival order. Dropping the channel stops both the
/// reader and the writer.
pub struct EventChannel {
    outbound: mpsc::UnboundedSender<Message>,
    handlers: Arc<HandlerRegistry>,
    closed_rx: watch::Receiver<bool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl EventChannel {
    /// Open a WebSocket to `url` (e.g. `ws://127.0.0.1:5555/ws`).
    pub async fn connect(url: &str) -> Result<Self> {
        info!(url, "Connecting event channel");
        let (ws, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| DevopsPackError::WebSocket(e.to_string()))?;
        debug!(status = %response.status(), "Event channel connected");
        Ok(Self::from_stream(ws))
    }

    /// Drive an already-established WebSocket stream.
    pub fn from_stream<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (closed_tx, closed_rx) = watch::channel(false);
        let handlers = Arc::new(HandlerRegistry::default());

        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let is_close = matches!(msg, Message::Close(_));
                if let Err(e) = ws_tx.send(msg).await {
                    warn!(%e, "Event channel send failed");
                    break;
                }
                if is_close {
                    break;
                }
            }
        });

        let registry = handlers.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg_result) = ws_rx.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match EventFrame::from_text(text.as_str()) {
                        Ok(frame) => registry.dispatch(&frame),
                        Err(e) => warn!(%e, "Ignoring undecodable frame"),
                    },
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "Server closed event channel");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(%e, "Event channel read error");
                        break;
                    }
                }
            }
            let _ = closed_tx.send(true);
        });

        Self {
            outbound,
            handlers,
            closed_rx,
            reader,
            writer,
        }
    }

    /// Register a handler for every inbound `event`.
    pub fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(Option<&serde_json::Value>) + Send + Sync + 'static,
    {
        self.handlers.register(event, Arc::new(handler));
    }

    /// Register a handler receiving the payload as text.
    ///
    /// String payloads are passed verbatim; other JSON values are passed as
    /// their JSON text. Events without a payload are skipped.
    pub fn on_text<F>(&self, event: &str, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on(event, move |data| match data {
            Some(serde_json::Value::String(text)) => handler(text),
            Some(other) => handler(&other.to_string()),
            None => debug!("Skipping event without payload"),
        });
    }

    /// Emit `event` with `payload`. Fire-and-forget: failures are logged only.
    pub fn send<T: Serialize + ?Sized>(&self, event: &str, payload: &T) {
        let frame = match serde_json::to_value(payload) {
            Ok(data) => EventFrame::new(event, Some(data)),
            Err(e) => {
                warn!(event, %e, "Failed to serialize event payload");
                return;
            }
        };
        match frame.to_text() {
            Ok(text) => {
                if self.outbound.send(Message::Text(text.into())).is_err() {
                    warn!(event, "Event channel closed, dropping event");
                }
            }
            Err(e) => warn!(event, %e, "Failed to encode event frame"),
        }
    }

    /// Whether the server side is still connected.
    pub fn is_open(&self) -> bool {
        !*self.closed_rx.borrow()
    }

    /// Resolve once the server closes the connection or it fails.
    pub async fn closed(&self) {
        let mut rx = self.closed_rx.clone();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Send a close frame and tear the connection down.
    pub async fn close(mut self) {
        let _ = self.outbound.send(Message::Close(None));
        if tokio::time::timeout(Duration::from_secs(1), &mut self.writer)
            .await
            .is_err()
        {
            debug!("Writer did not finish before close timeout");
        }
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
