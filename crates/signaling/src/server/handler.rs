//! Per-connection WebSocket handling and membership broadcasting.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Message, Result as WsResult},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{ClientMessage, ServerMessage};
use crate::server::registry::PeerRegistry;
use crate::server::relay::SignalRelay;

/// State shared by every connection of one server instance.
pub(crate) struct ServerState {
    pub registry: Arc<PeerRegistry>,
    pub relay: SignalRelay,
}

/// Handle a single client connection from accept to cleanup.
///
/// Inbound frames are processed strictly in arrival order for this
/// connection; outbound messages go through a channel drained by a forward
/// task so registry lookups never hold the socket.
pub(crate) async fn handle_connection(stream: TcpStream, state: Arc<ServerState>) -> WsResult<()> {
    let addr = stream.peer_addr()?;
    let conn_id = Uuid::new_v4();
    info!("Client connected: {} ({})", conn_id, addr);

    let ws_stream = accept_async(stream).await?;
    let (ws_tx, mut ws_rx) = ws_stream.split();
    let ws_tx = Arc::new(RwLock::new(ws_tx));

    // Outbound channel for this connection. Everything addressed to this
    // client, acks and relayed envelopes alike, is enqueued here and written
    // out in order.
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(128);

    let ws_tx_forward = Arc::clone(&ws_tx);
    let forward_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match msg.encode() {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode outbound message: {}", e);
                    continue;
                }
            };
            let mut ws_tx = ws_tx_forward.write().await;
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Peer id recorded at registration time. Cleanup uses this, never a
    // client-resupplied value.
    let mut registered_id: Option<String> = None;

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                handle_message(&text, &state, &mut registered_id, &tx).await;
            }
            Ok(Message::Close(_)) => {
                debug!("Connection {} closed by client", conn_id);
                break;
            }
            Ok(Message::Ping(data)) => {
                let mut ws_tx = ws_tx.write().await;
                let _ = ws_tx.send(Message::Pong(data)).await;
            }
            Err(e) => {
                warn!("WebSocket error on {}: {}", conn_id, e);
                break;
            }
            _ => {}
        }
    }

    // Transport close implies unregister.
    if let Some(peer_id) = registered_id {
        info!("Peer disconnected: {}", peer_id);
        if state.registry.unregister(&peer_id).await {
            broadcast_peer_list(&state.registry).await;
        }
    }

    forward_task.abort();
    Ok(())
}

async fn handle_message(
    text: &str,
    state: &ServerState,
    registered_id: &mut Option<String>,
    tx: &mpsc::Sender<ServerMessage>,
) {
    let msg = match ClientMessage::decode(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!("Unparseable client message: {}", e);
            send_error(tx, format!("Failed to parse message: {e}")).await;
            return;
        }
    };

    match msg {
        ClientMessage::Register { peer_id } => {
            handle_register(state, registered_id, tx, peer_id).await;
        }
        ClientMessage::Signal { to, kind, payload } => {
            if let Err(e) = state
                .relay
                .forward(registered_id.as_deref(), &to, &kind, payload)
                .await
            {
                send_error(tx, e.to_string()).await;
            }
        }
        ClientMessage::ListPeers => {
            let peers = state.registry.peer_ids().await;
            let _ = tx.send(ServerMessage::PeersUpdate { peers }).await;
        }
    }
}

async fn handle_register(
    state: &ServerState,
    registered_id: &mut Option<String>,
    tx: &mpsc::Sender<ServerMessage>,
    peer_id: String,
) {
    if let Some(current) = registered_id {
        send_error(tx, format!("Already registered as {current}")).await;
        return;
    }

    match state.registry.register(&peer_id, tx.clone()).await {
        Ok(()) => {
            *registered_id = Some(peer_id.clone());
            // The ack is enqueued ahead of the membership broadcast, so the
            // client always sees `registered` before anything else.
            let _ = tx
                .send(ServerMessage::Registered {
                    peer_id: peer_id.clone(),
                })
                .await;
            broadcast_peer_list(&state.registry).await;
        }
        Err(e) => send_error(tx, e.to_string()).await,
    }
}

async fn send_error(tx: &mpsc::Sender<ServerMessage>, message: String) {
    let _ = tx.send(ServerMessage::Error { message }).await;
}

/// Push the full current peer-id list to every registered client.
///
/// Always a full-set replace; membership is small enough that delta
/// tracking is not worth carrying.
pub(crate) async fn broadcast_peer_list(registry: &PeerRegistry) {
    let (peers, senders) = registry.snapshot().await;
    debug!("Broadcasting peer list: {:?}", peers);
    for sender in senders {
        let _ = sender
            .send(ServerMessage::PeersUpdate {
                peers: peers.clone(),
            })
            .await;
    }
}
