//! Peer registry: maps peer ids to live client connections.

use std::collections::HashMap;
use std::time::SystemTime;

use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::protocol::ServerMessage;
use crate::{Error, Result};

/// Outbound channel for a registered client connection. Messages enqueued
/// here are written to the connection's WebSocket in order.
pub type PeerSender = mpsc::Sender<ServerMessage>;

/// A live registration. Created on a successful `register`, destroyed when
/// the owning connection closes or explicitly unregisters.
pub struct PeerRegistration {
    pub peer_id: String,
    pub sender: PeerSender,
    /// Unix seconds at registration time.
    pub registered_at: u64,
}

/// Membership map for the signaling fabric.
///
/// At most one registration exists per peer id at any time. Ids are
/// case-sensitive and stored exactly as supplied. The connection handler
/// unregisters with the id it recorded at registration time when the
/// transport closes, so entries never outlive their connection.
#[derive(Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<String, PeerRegistration>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `peer_id` for a connection. The duplicate check and the
    /// insert happen under a single write-lock acquisition, so of two
    /// concurrent registrations for the same id exactly one succeeds.
    pub async fn register(&self, peer_id: &str, sender: PeerSender) -> Result<()> {
        if peer_id.is_empty() {
            return Err(Error::InvalidPeerId);
        }

        let mut peers = self.peers.write().await;
        if peers.contains_key(peer_id) {
            return Err(Error::DuplicateId(peer_id.to_string()));
        }

        peers.insert(
            peer_id.to_string(),
            PeerRegistration {
                peer_id: peer_id.to_string(),
                sender,
                registered_at: unix_timestamp(),
            },
        );
        debug!("Peer registered: {} (total: {})", peer_id, peers.len());
        Ok(())
    }

    /// Remove a registration. Idempotent; returns whether an entry was
    /// actually removed.
    pub async fn unregister(&self, peer_id: &str) -> bool {
        let removed = self.peers.write().await.remove(peer_id).is_some();
        if removed {
            debug!("Peer unregistered: {}", peer_id);
        }
        removed
    }

    /// Look up the outbound channel for `peer_id`.
    pub async fn lookup(&self, peer_id: &str) -> Option<PeerSender> {
        self.peers.read().await.get(peer_id).map(|r| r.sender.clone())
    }

    /// Current peer ids. Order carries no meaning.
    pub async fn peer_ids(&self) -> Vec<String> {
        self.peers.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Consistent snapshot of the membership list and every outbound
    /// channel, taken under one read lock so broadcasts describe a single
    /// moment.
    pub(crate) async fn snapshot(&self) -> (Vec<String>, Vec<PeerSender>) {
        let peers = self.peers.read().await;
        let ids = peers.keys().cloned().collect();
        let senders = peers.values().map(|r| r.sender.clone()).collect();
        (ids, senders)
    }
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
