//! Per-remote-peer negotiation state machine.
//!
//! Each session runs as one task consuming a queue of inputs: relayed
//! envelopes, locally discovered candidates, transport connectivity reports,
//! and teardown. Serializing everything through that queue makes every
//! transition deterministic; the only long wait is for transport
//! connectivity, bounded by the configured negotiation deadline.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::NegotiationConfig;
use crate::protocol::{OutboundSignal, SignalKind};
use crate::session::transport::{TransportFactory, TransportNotice, TransportStatus};
use crate::session::SessionTransport;

/// Lifecycle of a negotiation session with one remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No negotiation traffic yet.
    Idle,
    /// We sent an offer and are waiting for the answer.
    OfferSent,
    /// A remote offer is being applied.
    OfferReceived,
    /// Both descriptions are in place; waiting for connectivity.
    AnswerExchanged,
    /// The transport reported an established connection.
    Connected,
    /// Negotiation ended without a connection. Terminal; reconnecting
    /// requires a fresh session.
    Failed(FailureReason),
    /// Torn down; the transport and queued candidates are released.
    Closed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Failed(_) | SessionState::Closed)
    }
}

/// Why a session reached [`SessionState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    NegotiationTimeout,
    MalformedDescription,
    TransportFailure,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::NegotiationTimeout => write!(f, "negotiation timeout"),
            FailureReason::MalformedDescription => write!(f, "malformed description"),
            FailureReason::TransportFailure => write!(f, "transport failure"),
        }
    }
}

/// State report emitted toward the owning endpoint on every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationEvent {
    pub remote_id: String,
    pub state: SessionState,
}

/// Inputs serialized onto a session's queue.
#[derive(Debug)]
pub(crate) enum SessionInput {
    /// Start an outbound negotiation (send an offer).
    Initiate,
    RemoteOffer(Value),
    RemoteAnswer(Value),
    RemoteCandidate(Value),
    Close,
}

/// Handle held by the negotiator for one running session.
pub(crate) struct SessionHandle {
    input_tx: mpsc::Sender<SessionInput>,
    state_rx: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Queue an input. Sending to a session that already closed is a silent
    /// no-op, which is exactly what stale traffic should get.
    pub async fn send(&self, input: SessionInput) {
        let _ = self.input_tx.send(input).await;
    }
}

/// Spawn the task for one session and return its handle.
pub(crate) fn spawn_session(
    remote_id: String,
    config: NegotiationConfig,
    factory: Arc<dyn TransportFactory>,
    outbound_tx: mpsc::Sender<OutboundSignal>,
    event_tx: mpsc::Sender<NegotiationEvent>,
) -> SessionHandle {
    let (input_tx, input_rx) = mpsc::channel(32);
    let (state_tx, state_rx) = watch::channel(SessionState::Idle);

    tokio::spawn(run_session(
        remote_id, config, factory, input_rx, outbound_tx, event_tx, state_tx,
    ));

    SessionHandle { input_tx, state_rx }
}

async fn run_session(
    remote_id: String,
    config: NegotiationConfig,
    factory: Arc<dyn TransportFactory>,
    mut input_rx: mpsc::Receiver<SessionInput>,
    outbound_tx: mpsc::Sender<OutboundSignal>,
    event_tx: mpsc::Sender<NegotiationEvent>,
    state_tx: watch::Sender<SessionState>,
) {
    let (notice_tx, mut notice_rx) = mpsc::channel(32);
    let mut session = SessionTask {
        remote_id,
        config,
        factory,
        notice_tx,
        outbound_tx,
        event_tx,
        state_tx,
        state: SessionState::Idle,
        transport: None,
        pending_candidates: Vec::new(),
        deadline: None,
    };

    loop {
        let deadline = session.deadline;
        tokio::select! {
            input = input_rx.recv() => match input {
                Some(input) => session.handle_input(input).await,
                // The owner dropped the handle; treat it as teardown.
                None => {
                    session.close().await;
                    break;
                }
            },
            Some(notice) = notice_rx.recv() => session.handle_notice(notice).await,
            _ = deadline_elapsed(deadline) => {
                warn!("Session {}: negotiation deadline elapsed", session.remote_id);
                session.fail(FailureReason::NegotiationTimeout).await;
            }
        }

        if session.state == SessionState::Closed {
            break;
        }
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

struct SessionTask {
    remote_id: String,
    config: NegotiationConfig,
    factory: Arc<dyn TransportFactory>,
    notice_tx: mpsc::Sender<TransportNotice>,
    outbound_tx: mpsc::Sender<OutboundSignal>,
    event_tx: mpsc::Sender<NegotiationEvent>,
    state_tx: watch::Sender<SessionState>,
    state: SessionState,
    transport: Option<Arc<dyn SessionTransport>>,
    /// Remote candidates that arrived before a remote description.
    pending_candidates: Vec<Value>,
    deadline: Option<Instant>,
}

impl SessionTask {
    async fn handle_input(&mut self, input: SessionInput) {
        match input {
            SessionInput::Initiate => self.initiate().await,
            SessionInput::RemoteOffer(offer) => self.on_remote_offer(offer).await,
            SessionInput::RemoteAnswer(answer) => self.on_remote_answer(answer).await,
            SessionInput::RemoteCandidate(candidate) => self.on_remote_candidate(candidate).await,
            SessionInput::Close => self.close().await,
        }
    }

    async fn handle_notice(&mut self, notice: TransportNotice) {
        match notice {
            TransportNotice::LocalCandidate(candidate) => {
                // Candidates may surface concurrently with the description
                // exchange; anything discovered after teardown is dropped.
                if self.state == SessionState::Idle || self.state.is_terminal() {
                    return;
                }
                self.send_signal(SignalKind::IceCandidate, candidate).await;
            }
            TransportNotice::Status(status) => self.on_status(status).await,
        }
    }

    async fn initiate(&mut self) {
        if self.state != SessionState::Idle {
            debug!(
                "Session {}: initiate ignored in state {:?}",
                self.remote_id, self.state
            );
            return;
        }

        let transport = match self.create_transport().await {
            Some(transport) => transport,
            None => return,
        };
        let offer = match transport.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                warn!("Session {}: offer creation failed: {}", self.remote_id, e);
                self.fail(FailureReason::TransportFailure).await;
                return;
            }
        };

        info!("Session {}: sending offer", self.remote_id);
        self.send_signal(SignalKind::Offer, offer).await;
        self.arm_deadline();
        self.transition(SessionState::OfferSent);
    }

    async fn on_remote_offer(&mut self, offer: Value) {
        if self.state != SessionState::Idle {
            debug!(
                "Session {}: offer ignored in state {:?}",
                self.remote_id, self.state
            );
            return;
        }

        let transport = match self.create_transport().await {
            Some(transport) => transport,
            None => return,
        };
        self.arm_deadline();
        self.transition(SessionState::OfferReceived);

        match transport.accept_offer(offer).await {
            Ok(answer) => {
                info!("Session {}: sending answer", self.remote_id);
                self.send_signal(SignalKind::Answer, answer).await;
                self.transition(SessionState::AnswerExchanged);
                self.flush_candidates().await;
            }
            Err(e) => {
                warn!("Session {}: rejected remote offer: {}", self.remote_id, e);
                self.fail(FailureReason::MalformedDescription).await;
            }
        }
    }

    async fn on_remote_answer(&mut self, answer: Value) {
        if self.state != SessionState::OfferSent {
            // Stale or duplicate answer. Never an error: signaling has no
            // delivery guarantees, so replays are expected.
            debug!(
                "Session {}: discarding answer in state {:?}",
                self.remote_id, self.state
            );
            return;
        }
        let Some(transport) = self.transport.clone() else {
            return;
        };

        match transport.accept_answer(answer).await {
            Ok(()) => {
                self.transition(SessionState::AnswerExchanged);
                self.flush_candidates().await;
            }
            Err(e) => {
                warn!("Session {}: rejected remote answer: {}", self.remote_id, e);
                self.fail(FailureReason::MalformedDescription).await;
            }
        }
    }

    async fn on_remote_candidate(&mut self, candidate: Value) {
        match self.state {
            SessionState::Idle | SessionState::Failed(_) | SessionState::Closed => {
                debug!(
                    "Session {}: dropping candidate in state {:?}",
                    self.remote_id, self.state
                );
            }
            // No remote description yet; hold the candidate until the
            // answer lands.
            SessionState::OfferSent => self.pending_candidates.push(candidate),
            _ => self.apply_candidate(candidate).await,
        }
    }

    async fn on_status(&mut self, status: TransportStatus) {
        if self.state.is_terminal() {
            return;
        }
        match status {
            TransportStatus::Connected => {
                info!("Session {}: connected", self.remote_id);
                self.deadline = None;
                self.transition(SessionState::Connected);
            }
            TransportStatus::Failed => self.fail(FailureReason::TransportFailure).await,
            TransportStatus::Disconnected | TransportStatus::Closed => self.close().await,
            TransportStatus::Connecting => {}
        }
    }

    /// Tear the session down. Idempotent, and safe to race with any
    /// in-flight transition since everything funnels through one queue.
    async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
        self.pending_candidates.clear();
        self.deadline = None;
        self.transition(SessionState::Closed);
    }

    async fn fail(&mut self, reason: FailureReason) {
        if self.state.is_terminal() {
            return;
        }
        // Release the transport now; a failed session only lingers to
        // absorb stale traffic until the negotiator replaces it.
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
        self.pending_candidates.clear();
        self.deadline = None;
        self.transition(SessionState::Failed(reason));
    }

    async fn create_transport(&mut self) -> Option<Arc<dyn SessionTransport>> {
        match self
            .factory
            .create(&self.remote_id, self.notice_tx.clone())
            .await
        {
            Ok(transport) => {
                self.transport = Some(Arc::clone(&transport));
                Some(transport)
            }
            Err(e) => {
                warn!(
                    "Session {}: transport creation failed: {}",
                    self.remote_id, e
                );
                self.fail(FailureReason::TransportFailure).await;
                None
            }
        }
    }

    async fn apply_candidate(&mut self, candidate: Value) {
        let Some(transport) = &self.transport else {
            return;
        };
        if let Err(e) = transport.add_remote_candidate(candidate).await {
            // Malformed or unsupported candidates are dropped, not fatal.
            warn!("Session {}: dropped candidate: {}", self.remote_id, e);
        }
    }

    async fn flush_candidates(&mut self) {
        for candidate in std::mem::take(&mut self.pending_candidates) {
            self.apply_candidate(candidate).await;
        }
    }

    async fn send_signal(&self, kind: SignalKind, payload: Value) {
        let _ = self
            .outbound_tx
            .send(OutboundSignal {
                to: self.remote_id.clone(),
                kind,
                payload,
            })
            .await;
    }

    fn arm_deadline(&mut self) {
        self.deadline = Some(Instant::now() + self.config.negotiation_timeout);
    }

    fn transition(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        debug!(
            "Session {}: {:?} -> {:?}",
            self.remote_id, self.state, next
        );
        self.state = next;
        let _ = self.state_tx.send(next);
        // State reports are advisory; the watch channel carries the
        // authoritative state. Never block the session on a slow consumer.
        if let Err(e) = self.event_tx.try_send(NegotiationEvent {
            remote_id: self.remote_id.clone(),
            state: next,
        }) {
            debug!("Session {}: dropped state report: {}", self.remote_id, e);
        }
    }
}
