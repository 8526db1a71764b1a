//! Session negotiation: one state machine per remote peer.
//!
//! The original deployment of this protocol shared a single connection
//! object across every remote peer; here each remote id owns its own
//! [`machine`] instance so concurrent negotiations with different peers
//! never share transport state.

mod machine;
mod transport;

pub use machine::{FailureReason, NegotiationEvent, SessionState};
pub use transport::{
    RtcTransport, RtcTransportFactory, SessionTransport, TransportFactory, TransportNotice,
    TransportStatus,
};

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::config::NegotiationConfig;
use crate::protocol::{OutboundSignal, SignalKind};
use crate::Result;

use machine::{SessionHandle, SessionInput};

/// Drives negotiation sessions keyed by remote peer id.
///
/// Envelopes the negotiator wants delivered go out on the `outbound` channel
/// handed to [`Negotiator::new`]; state transitions are reported on the
/// event channel. Sessions are created lazily: by [`connect`](Self::connect)
/// for the outbound direction, or by the first inbound offer.
pub struct Negotiator {
    local_id: String,
    config: NegotiationConfig,
    factory: Arc<dyn TransportFactory>,
    outbound_tx: mpsc::Sender<OutboundSignal>,
    event_tx: mpsc::Sender<NegotiationEvent>,
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl Negotiator {
    pub fn new(
        local_id: impl Into<String>,
        config: NegotiationConfig,
        factory: Arc<dyn TransportFactory>,
        outbound_tx: mpsc::Sender<OutboundSignal>,
        event_tx: mpsc::Sender<NegotiationEvent>,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            config,
            factory,
            outbound_tx,
            event_tx,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Start negotiating with `remote_id`.
    ///
    /// A live session is reused (the extra initiate is ignored by its
    /// machine); a Failed or Closed one is replaced by a fresh session.
    pub async fn connect(&self, remote_id: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let session = self.session_slot(&mut sessions, remote_id);
        session.send(SessionInput::Initiate).await;
        Ok(())
    }

    /// Route a relayed envelope to its session.
    ///
    /// Offers create sessions lazily. Answers and candidates addressed to a
    /// peer we have no session for are stale leftovers of a torn-down
    /// negotiation and are dropped silently.
    pub async fn handle_signal(&self, from: &str, kind: &str, payload: Value) {
        let Some(kind) = SignalKind::parse(kind) else {
            warn!("Ignoring signal with unknown type '{}' from {}", kind, from);
            return;
        };

        let mut sessions = self.sessions.lock().await;
        match kind {
            SignalKind::Offer => {
                let session = self.session_slot(&mut sessions, from);
                session.send(SessionInput::RemoteOffer(payload)).await;
            }
            SignalKind::Answer => match sessions.get(from) {
                Some(session) => session.send(SessionInput::RemoteAnswer(payload)).await,
                None => debug!("Discarding answer from {} with no session", from),
            },
            SignalKind::IceCandidate => match sessions.get(from) {
                Some(session) => session.send(SessionInput::RemoteCandidate(payload)).await,
                None => debug!("Discarding candidate from {} with no session", from),
            },
        }
    }

    /// Tear down the session with `remote_id`, if any.
    pub async fn close(&self, remote_id: &str) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.remove(remote_id) {
            session.send(SessionInput::Close).await;
        }
    }

    /// Tear down every session.
    pub async fn close_all(&self) {
        let mut sessions = self.sessions.lock().await;
        for (_, session) in sessions.drain() {
            session.send(SessionInput::Close).await;
        }
    }

    /// Close sessions whose remote peer left the signaling fabric.
    pub async fn sync_membership(&self, peers: &[String]) {
        let mut sessions = self.sessions.lock().await;
        let gone: Vec<String> = sessions
            .keys()
            .filter(|id| !peers.contains(id))
            .cloned()
            .collect();
        for id in gone {
            if let Some(session) = sessions.remove(&id) {
                info!("Remote peer {} left, closing session", id);
                session.send(SessionInput::Close).await;
            }
        }
    }

    /// Current state of the session with `remote_id`, if one exists.
    pub async fn state_of(&self, remote_id: &str) -> Option<SessionState> {
        self.sessions
            .lock()
            .await
            .get(remote_id)
            .map(|session| session.state())
    }

    /// Remote ids with a session, in no particular order.
    pub async fn session_ids(&self) -> Vec<String> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    /// Look up a usable session for `remote_id`, replacing terminal ones.
    fn session_slot<'a>(
        &self,
        sessions: &'a mut HashMap<String, SessionHandle>,
        remote_id: &str,
    ) -> &'a SessionHandle {
        match sessions.entry(remote_id.to_string()) {
            Entry::Occupied(mut slot) => {
                if slot.get().is_terminal() {
                    debug!("Replacing terminal session for {}", remote_id);
                    slot.insert(self.spawn(remote_id));
                }
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(self.spawn(remote_id)),
        }
    }

    fn spawn(&self, remote_id: &str) -> SessionHandle {
        machine::spawn_session(
            remote_id.to_string(),
            self.config.clone(),
            Arc::clone(&self.factory),
            self.outbound_tx.clone(),
            self.event_tx.clone(),
        )
    }
}
