//! WebSocket front of the coordinator.

use crate::room::coordinator::Coordinator;
use crate::signaling::protocol::ClientMessage;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Message, Result as WsResult},
};
use tracing::{debug, error, info, warn};

/// Accepts connections until the listener fails.
pub async fn serve(listener: TcpListener, coordinator: Arc<Coordinator>) -> std::io::Result<()> {
    info!("coordinator listening on {}", listener.local_addr()?);

    loop {
        let (stream, addr) = listener.accept().await?;
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, addr, coordinator).await {
                warn!(%addr, "connection ended with error: {e}");
            }
        });
    }
}

/// Handle a single WebSocket connection
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    coordinator: Arc<Coordinator>,
) -> WsResult<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let (id, mut outbox) = coordinator.connect().await;
    info!(%addr, participant = %id, "new websocket connection");

    // Single writer: forwards coordinator messages (and pongs) to the socket
    let (raw_tx, mut raw_rx) = tokio::sync::mpsc::unbounded_channel::<Message>();
    let writer_id = id.clone();
    let writer = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                msg = outbox.recv() => match msg {
                    Some(msg) => match msg.to_json() {
                        Ok(json) => Message::Text(json),
                        Err(e) => {
                            error!(participant = %writer_id, "failed to encode message: {e}");
                            continue;
                        }
                    },
                    None => break,
                },
                raw = raw_rx.recv() => match raw {
                    Some(raw) => raw,
                    None => break,
                },
            };
            if let Err(e) = ws_tx.send(frame).await {
                error!(participant = %writer_id, "failed to send websocket message: {e}");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => match ClientMessage::from_json(&text) {
                Ok(msg) => coordinator.handle(&id, msg).await,
                Err(e) => warn!(participant = %id, "undecodable frame skipped: {e}"),
            },
            Ok(Message::Ping(data)) => {
                let _ = raw_tx.send(Message::Pong(data));
            }
            Ok(Message::Close(_)) => {
                debug!(participant = %id, "closed by client");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(participant = %id, "websocket error: {e}");
                break;
            }
        }
    }

    coordinator.disconnect(&id).await;
    drop(raw_tx);
    writer.abort();
    Ok(())
}
