//! WebSocket relay client: one long-lived connection to the coordinator.

use crate::error::SignalingError;
use crate::peer::engine::{EngineEvent, EventSender};
use crate::signaling::protocol::{ClientMessage, ServerMessage};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Sending half of the relay channel. Incoming messages are pushed into the
/// engine's event queue as [`EngineEvent::Signal`].
pub struct RelayClient {
    tx: mpsc::UnboundedSender<Message>,
}

impl RelayClient {
    pub async fn connect(url: &str, events: EventSender) -> Result<Self, SignalingError> {
        info!("connecting to coordinator: {url}");
        let (ws_stream, _) = connect_async(url).await?;
        info!("connected to coordinator");

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::sender_task(write, rx));
        tokio::spawn(Self::receiver_task(read, tx.clone(), events));

        Ok(Self { tx })
    }

    pub fn send(&self, msg: &ClientMessage) -> Result<(), SignalingError> {
        debug!(event = msg.event_name(), "sending");
        let json = msg.to_json()?;
        self.tx
            .send(Message::Text(json))
            .map_err(|_| SignalingError::Closed)
    }

    /// Sends a close frame; the receiver task then reports `RelayClosed`.
    pub fn close(&self) {
        let _ = self.tx.send(Message::Close(None));
    }

    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = write.send(msg).await {
                error!("failed to send websocket message: {e}");
                break;
            }
            if closing {
                break;
            }
        }
        debug!("relay sender task terminated");
    }

    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        raw_tx: mpsc::UnboundedSender<Message>,
        events: EventSender,
    ) {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => match ServerMessage::from_json(&text) {
                    Ok(msg) => {
                        if events.send(EngineEvent::Signal(msg)).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("undecodable relay message skipped: {e}"),
                },
                Ok(Message::Ping(data)) => {
                    let _ = raw_tx.send(Message::Pong(data));
                }
                Ok(Message::Close(_)) => {
                    info!("relay connection closed by coordinator");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("relay websocket error: {e}");
                    break;
                }
            }
        }

        let _ = events.send(EngineEvent::RelayClosed);
        debug!("relay receiver task terminated");
    }
}
