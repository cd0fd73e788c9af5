/// WebSocket transport for the realtime channel
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::{
    CollaborationError, EventHandler, HandlerRegistry, JoinRequest, RealtimeChannel,
    RealtimeMessage, Result, SocketEvent, SubscriptionId,
};

pub struct WsChannel {
    registry: HandlerRegistry,
    tx: mpsc::UnboundedSender<Message>,
    connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl WsChannel {
    /// Connect to the relay and join `join.room_id`.
    pub async fn connect(url: &str, join: JoinRequest) -> Result<Self> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| CollaborationError::NetworkError(e.to_string()))?;

        info!("Realtime connection established: {}", url);

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let registry = HandlerRegistry::new();
        let connected = Arc::new(AtomicBool::new(true));

        // Task to send queued frames to the relay
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = ws_sender.send(msg).await {
                    error!("Failed to send realtime frame: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        // Task to dispatch incoming frames to handlers
        let reader_registry = registry.clone();
        let reader_connected = Arc::clone(&connected);
        let pong_tx = tx.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => match RealtimeMessage::from_text(&text) {
                        Ok(message) => {
                            let handled =
                                reader_registry.dispatch(&message.event, &message.payload);
                            debug!("Event {} dispatched to {} handlers", message.event, handled);
                        }
                        Err(e) => warn!("Ignoring malformed realtime frame: {}", e),
                    },
                    Ok(Message::Ping(data)) => {
                        let _ = pong_tx.send(Message::Pong(data));
                    }
                    Ok(Message::Close(_)) => {
                        info!("Realtime connection closed by relay");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Realtime connection error: {}", e);
                        break;
                    }
                }
            }
            reader_connected.store(false, Ordering::SeqCst);
        });

        let channel = Self {
            registry,
            tx,
            connected,
            reader,
            writer: Mutex::new(Some(writer)),
        };
        channel.emit(SocketEvent::JoinRequest.as_str(), serde_json::to_value(join)?)?;

        Ok(channel)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    /// Ask the relay to close the connection.
    pub fn close(&self) {
        let _ = self.tx.send(Message::Close(None));
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Close and wait until every frame queued before this call is written.
    pub async fn disconnect(&self) {
        self.close();
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            let _ = writer.await;
        }
        debug!("Realtime connection shut down");
    }
}

impl RealtimeChannel for WsChannel {
    fn subscribe(&self, event: &str, handler: EventHandler) -> SubscriptionId {
        self.registry.add(event, handler)
    }

    fn unsubscribe(&self, event: &str) {
        self.registry.remove_event(event);
    }

    fn unsubscribe_handler(&self, id: SubscriptionId) {
        self.registry.remove_handler(id);
    }

    fn emit(&self, event: &str, payload: serde_json::Value) -> Result<()> {
        if !self.is_connected() {
            return Err(CollaborationError::ChannelClosed(
                "realtime connection is closed".to_string(),
            ));
        }

        let text = RealtimeMessage::new(event, payload).to_text()?;
        self.tx
            .send(Message::Text(text))
            .map_err(|e| CollaborationError::ChannelClosed(e.to_string()))
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
