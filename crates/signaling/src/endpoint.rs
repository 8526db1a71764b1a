//! Client-side runtime tying the signaling connection to the negotiator.
//!
//! An endpoint registers one peer id, routes relayed envelopes into
//! per-remote-peer sessions, and pushes the sessions' own envelopes back
//! through the relay. Consumers (a ground station dashboard, a drone's
//! onboard process) watch the event stream and decide when to dial.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::{ClientEvent, SignalingClient};
use crate::config::NegotiationConfig;
use crate::protocol::{ClientMessage, OutboundSignal};
use crate::session::{NegotiationEvent, Negotiator, SessionState, TransportFactory};
use crate::Result;

/// Events surfaced to the endpoint's consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointEvent {
    /// Our registration was acknowledged.
    Registered { peer_id: String },
    /// Current membership of the signaling fabric (full replace).
    Peers(Vec<String>),
    /// A negotiation session changed state.
    Session(NegotiationEvent),
    /// The server rejected something we sent.
    ServerError { message: String },
    /// The signaling connection is gone; sessions have been closed.
    Disconnected,
}

/// A registered peer on the signaling fabric.
pub struct Endpoint {
    peer_id: String,
    client: SignalingClient,
    negotiator: Arc<Negotiator>,
    pump: JoinHandle<()>,
    outbound_task: JoinHandle<()>,
}

impl Endpoint {
    /// Connect to the rendezvous server at `url`, register as `peer_id`,
    /// and start routing signals. Registration failures (duplicate id)
    /// arrive as [`EndpointEvent::ServerError`].
    pub async fn connect(
        url: &str,
        peer_id: &str,
        config: NegotiationConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> Result<(Self, mpsc::Receiver<EndpointEvent>)> {
        config.validate()?;

        let (client, mut client_events) = SignalingClient::connect(url).await?;
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundSignal>(64);
        let (negotiation_tx, mut negotiation_rx) = mpsc::channel::<NegotiationEvent>(64);
        let (event_tx, event_rx) = mpsc::channel::<EndpointEvent>(64);

        let negotiator = Arc::new(Negotiator::new(
            peer_id,
            config,
            factory,
            outbound_tx,
            negotiation_tx,
        ));

        client.register(peer_id).await?;

        // Session envelopes flow straight into the connection's own queue;
        // the inbound pump never sits between a session and the wire.
        let message_tx = client.message_sender();
        let outbound_task = tokio::spawn(async move {
            while let Some(signal) = outbound_rx.recv().await {
                let msg = ClientMessage::Signal {
                    to: signal.to,
                    kind: signal.kind.as_str().to_string(),
                    payload: signal.payload,
                };
                if message_tx.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let pump_negotiator = Arc::clone(&negotiator);
        let pump_events = event_tx.clone();
        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    client_event = client_events.recv() => {
                        let Some(client_event) = client_event else { break };
                        match client_event {
                            ClientEvent::Registered { peer_id } => {
                                let _ = pump_events.send(EndpointEvent::Registered { peer_id }).await;
                            }
                            ClientEvent::Signal { from, kind, payload } => {
                                pump_negotiator.handle_signal(&from, &kind, payload).await;
                            }
                            ClientEvent::PeersUpdate { peers } => {
                                pump_negotiator.sync_membership(&peers).await;
                                let _ = pump_events.send(EndpointEvent::Peers(peers)).await;
                            }
                            ClientEvent::ServerError { message } => {
                                warn!("Server error: {}", message);
                                let _ = pump_events.send(EndpointEvent::ServerError { message }).await;
                            }
                            ClientEvent::Disconnected => {
                                debug!("Signaling connection lost");
                                pump_negotiator.close_all().await;
                                let _ = pump_events.send(EndpointEvent::Disconnected).await;
                                break;
                            }
                        }
                    }
                    negotiation_event = negotiation_rx.recv() => {
                        let Some(negotiation_event) = negotiation_event else { break };
                        let _ = pump_events.send(EndpointEvent::Session(negotiation_event)).await;
                    }
                }
            }
        });

        Ok((
            Self {
                peer_id: peer_id.to_string(),
                client,
                negotiator,
                pump,
                outbound_task,
            },
            event_rx,
        ))
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Start negotiating a session with `remote_id`.
    pub async fn dial(&self, remote_id: &str) -> Result<()> {
        self.negotiator.connect(remote_id).await
    }

    /// Tear down the session with `remote_id`.
    pub async fn hang_up(&self, remote_id: &str) {
        self.negotiator.close(remote_id).await;
    }

    /// Ask the server for the current membership list.
    pub async fn refresh_peers(&self) -> Result<()> {
        self.client.list_peers().await
    }

    /// Current state of the session with `remote_id`, if any.
    pub async fn session_state(&self, remote_id: &str) -> Option<SessionState> {
        self.negotiator.state_of(remote_id).await
    }

    /// Close every session and drop the signaling connection.
    pub async fn shutdown(self) {
        self.negotiator.close_all().await;
        self.pump.abort();
        self.outbound_task.abort();
        drop(self.client);
    }
}
