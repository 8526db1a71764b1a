//! Stateless envelope forwarding between registered peers.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::protocol::ServerMessage;
use crate::server::registry::PeerRegistry;
use crate::{Error, Result};

/// Forwards negotiation envelopes by peer id.
///
/// The relay holds no session state: it validates the envelope, stamps the
/// sender identity, and enqueues the message on the target's connection.
/// Errors are reported only to the sender and never close its connection.
pub struct SignalRelay {
    registry: Arc<PeerRegistry>,
}

impl SignalRelay {
    pub fn new(registry: Arc<PeerRegistry>) -> Self {
        Self { registry }
    }

    /// Validate and forward one envelope.
    ///
    /// `sender_id` is the peer id the server recorded for the sending
    /// connection at registration time, never a client-supplied value; it
    /// becomes the `from` field the target sees.
    pub async fn forward(
        &self,
        sender_id: Option<&str>,
        to: &str,
        kind: &str,
        payload: Value,
    ) -> Result<()> {
        let from = sender_id.ok_or(Error::NotRegistered)?;

        if to.is_empty() {
            return Err(Error::InvalidEnvelope("missing 'to'"));
        }
        if kind.is_empty() {
            return Err(Error::InvalidEnvelope("missing 'type'"));
        }
        if payload.is_null() {
            return Err(Error::InvalidEnvelope("missing 'payload'"));
        }

        let target = self
            .registry
            .lookup(to)
            .await
            .ok_or_else(|| Error::UnknownTarget(to.to_string()))?;

        debug!("Signal '{}' from {} -> {}", kind, from, to);

        // Best effort: a target that disconnected mid-flight just loses the
        // envelope. The sender learns about it, if at all, through its own
        // negotiation timeout.
        let _ = target
            .send(ServerMessage::Signal {
                from: from.to_string(),
                kind: kind.to_string(),
                payload,
            })
            .await;

        Ok(())
    }
}
