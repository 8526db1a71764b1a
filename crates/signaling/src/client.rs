//! WebSocket client for the rendezvous server.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::protocol::{ClientMessage, ServerMessage, SignalKind};
use crate::{Error, Result};

/// Inbound events from the server connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Registration acknowledged by the server.
    Registered { peer_id: String },
    /// Relayed negotiation envelope from a remote peer.
    Signal {
        from: String,
        kind: String,
        payload: Value,
    },
    /// Full membership list replace.
    PeersUpdate { peers: Vec<String> },
    /// Server-reported error for something this client sent.
    ServerError { message: String },
    /// The server connection closed.
    Disconnected,
}

/// Connection to a rendezvous server.
///
/// A background task owns the socket: it drains the outbound queue and turns
/// inbound frames into [`ClientEvent`]s. Dropping the client tears the
/// connection down.
pub struct SignalingClient {
    outbound_tx: mpsc::Sender<ClientMessage>,
    task: JoinHandle<()>,
}

impl SignalingClient {
    /// Connect to a server at `url` (e.g. `ws://127.0.0.1:4000`). Returns
    /// the client handle and the stream of inbound events.
    pub async fn connect(url: &str) -> Result<(Self, mpsc::Receiver<ClientEvent>)> {
        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientMessage>(64);
        let (event_tx, event_rx) = mpsc::channel::<ClientEvent>(64);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(msg) = outbound_rx.recv() => {
                        let text = match msg.encode() {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("Failed to encode client message: {}", e);
                                continue;
                            }
                        };
                        if write.send(Message::Text(text)).await.is_err() {
                            let _ = event_tx.send(ClientEvent::Disconnected).await;
                            break;
                        }
                    }
                    inbound = read.next() => match inbound {
                        Some(Ok(Message::Text(text))) => {
                            match ServerMessage::decode(&text) {
                                Ok(msg) => {
                                    if event_tx.send(event_from(msg)).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => debug!("Ignoring unparseable server message: {}", e),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            let _ = event_tx.send(ClientEvent::Disconnected).await;
                            break;
                        }
                        Some(Err(e)) => {
                            warn!("WebSocket error: {}", e);
                            let _ = event_tx.send(ClientEvent::Disconnected).await;
                            break;
                        }
                        _ => {}
                    }
                }
            }
        });

        Ok((Self { outbound_tx, task }, event_rx))
    }

    /// Request registration under `peer_id`. The ack arrives as
    /// [`ClientEvent::Registered`]; a taken id arrives as
    /// [`ClientEvent::ServerError`].
    pub async fn register(&self, peer_id: &str) -> Result<()> {
        self.send(ClientMessage::Register {
            peer_id: peer_id.to_string(),
        })
        .await
    }

    /// Send a negotiation envelope to `to` through the relay.
    pub async fn signal(&self, to: &str, kind: SignalKind, payload: Value) -> Result<()> {
        self.send(ClientMessage::Signal {
            to: to.to_string(),
            kind: kind.as_str().to_string(),
            payload,
        })
        .await
    }

    /// Ask for the current membership list.
    pub async fn list_peers(&self) -> Result<()> {
        self.send(ClientMessage::ListPeers).await
    }

    pub(crate) fn message_sender(&self) -> mpsc::Sender<ClientMessage> {
        self.outbound_tx.clone()
    }

    async fn send(&self, msg: ClientMessage) -> Result<()> {
        self.outbound_tx
            .send(msg)
            .await
            .map_err(|_| Error::ChannelClosed("signaling connection"))
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn event_from(msg: ServerMessage) -> ClientEvent {
    match msg {
        ServerMessage::Registered { peer_id } => ClientEvent::Registered { peer_id },
        ServerMessage::Signal {
            from,
            kind,
            payload,
        } => ClientEvent::Signal {
            from,
            kind,
            payload,
        },
        ServerMessage::PeersUpdate { peers } => ClientEvent::PeersUpdate { peers },
        ServerMessage::Error { message } => ClientEvent::ServerError { message },
    }
}
