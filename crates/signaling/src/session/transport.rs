//! Transport seam between the negotiation state machine and WebRTC.
//!
//! The state machine drives a [`SessionTransport`] and never touches
//! webrtc-rs types directly, so its transitions stay deterministic under
//! test. [`RtcTransport`] is the production implementation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::config::NegotiationConfig;
use crate::{Error, Result};

/// Connectivity as reported by the underlying transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Asynchronous notifications a transport pushes into its session's queue.
///
/// These interleave arbitrarily with relayed envelopes; the session task
/// serializes both onto one logical queue.
#[derive(Debug, Clone)]
pub enum TransportNotice {
    /// A local ICE candidate became available and should be signaled to the
    /// remote peer.
    LocalCandidate(Value),
    /// The transport's connectivity state changed.
    Status(TransportStatus),
}

/// Operations the negotiation state machine drives on a transport under
/// construction.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Generate the local offer description and apply it locally.
    async fn create_offer(&self) -> Result<Value>;

    /// Apply a remote offer and produce the local answer description,
    /// already applied locally.
    async fn accept_offer(&self, offer: Value) -> Result<Value>;

    /// Apply a remote answer description.
    async fn accept_answer(&self, answer: Value) -> Result<()>;

    /// Add a relayed remote ICE candidate.
    async fn add_remote_candidate(&self, candidate: Value) -> Result<()>;

    /// Release the transport and everything queued on it. Idempotent.
    async fn close(&self);
}

/// Builds one transport per negotiation session.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Create a transport for the session negotiating with `remote_id`,
    /// wiring its asynchronous notifications into `notice_tx`.
    async fn create(
        &self,
        remote_id: &str,
        notice_tx: mpsc::Sender<TransportNotice>,
    ) -> Result<Arc<dyn SessionTransport>>;
}

/// [`SessionTransport`] over a webrtc-rs peer connection.
pub struct RtcTransport {
    pc: Arc<RTCPeerConnection>,
}

impl RtcTransport {
    /// Build a peer connection from the configured ICE servers. Most
    /// callers go through [`RtcTransportFactory`], which also wires the
    /// connection's callbacks into a session queue.
    pub async fn new(config: &NegotiationConfig) -> Result<Arc<Self>> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media)?;

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        let pc = api
            .new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await?;

        Ok(Arc::new(Self { pc: Arc::new(pc) }))
    }

    /// The underlying peer connection, for handing the established session
    /// to a media/data layer.
    pub fn peer_connection(&self) -> Arc<RTCPeerConnection> {
        Arc::clone(&self.pc)
    }

    fn wire_callbacks(
        &self,
        remote_id: String,
        notice_tx: mpsc::Sender<TransportNotice>,
        established_tx: Option<mpsc::Sender<(String, Arc<RTCPeerConnection>)>>,
    ) {
        let candidate_tx = notice_tx.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let candidate_tx = candidate_tx.clone();
                Box::pin(async move {
                    // None marks the end of gathering; there is nothing to
                    // signal for it.
                    let Some(candidate) = candidate else { return };
                    match candidate.to_json() {
                        Ok(init) => match serde_json::to_value(&init) {
                            Ok(value) => {
                                let _ = candidate_tx
                                    .send(TransportNotice::LocalCandidate(value))
                                    .await;
                            }
                            Err(e) => warn!("Failed to encode local candidate: {}", e),
                        },
                        Err(e) => warn!("Failed to serialize local candidate: {}", e),
                    }
                })
            }));

        let pc = Arc::clone(&self.pc);
        self.pc.on_peer_connection_state_change(Box::new(
            move |conn_state: RTCPeerConnectionState| {
                let notice_tx = notice_tx.clone();
                let established_tx = established_tx.clone();
                let remote_id = remote_id.clone();
                let pc = Arc::clone(&pc);
                Box::pin(async move {
                    info!("Transport for {} is {}", remote_id, conn_state);
                    let status = match conn_state {
                        RTCPeerConnectionState::Connected => TransportStatus::Connected,
                        RTCPeerConnectionState::Disconnected => TransportStatus::Disconnected,
                        RTCPeerConnectionState::Failed => TransportStatus::Failed,
                        RTCPeerConnectionState::Closed => TransportStatus::Closed,
                        _ => TransportStatus::Connecting,
                    };
                    if status == TransportStatus::Connected {
                        if let Some(tx) = &established_tx {
                            let _ = tx.send((remote_id.clone(), pc)).await;
                        }
                    }
                    let _ = notice_tx.send(TransportNotice::Status(status)).await;
                })
            },
        ));
    }
}

#[async_trait]
impl SessionTransport for RtcTransport {
    async fn create_offer(&self) -> Result<Value> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer.clone()).await?;
        Ok(json!({"type": "offer", "sdp": offer.sdp}))
    }

    async fn accept_offer(&self, offer: Value) -> Result<Value> {
        let sdp = description_sdp(&offer, "offer")?;
        let remote = RTCSessionDescription::offer(sdp)
            .map_err(|e| Error::MalformedDescription(e.to_string()))?;
        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|e| Error::MalformedDescription(e.to_string()))?;

        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;
        Ok(json!({"type": "answer", "sdp": answer.sdp}))
    }

    async fn accept_answer(&self, answer: Value) -> Result<()> {
        let sdp = description_sdp(&answer, "answer")?;
        let remote = RTCSessionDescription::answer(sdp)
            .map_err(|e| Error::MalformedDescription(e.to_string()))?;
        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|e| Error::MalformedDescription(e.to_string()))?;
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: Value) -> Result<()> {
        let candidate_str = candidate
            .get("candidate")
            .and_then(|c| c.as_str())
            .unwrap_or("");
        if candidate_str.is_empty() {
            // End-of-candidates marker from the remote side.
            return Ok(());
        }

        let init = RTCIceCandidateInit {
            candidate: candidate_str.to_string(),
            sdp_mid: candidate
                .get("sdpMid")
                .and_then(|m| m.as_str())
                .map(str::to_string),
            sdp_mline_index: candidate
                .get("sdpMLineIndex")
                .and_then(|i| i.as_u64())
                .map(|i| i as u16),
            username_fragment: candidate
                .get("usernameFragment")
                .and_then(|u| u.as_str())
                .map(str::to_string),
        };
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            debug!("Peer connection close reported: {}", e);
        }
    }
}

fn description_sdp(value: &Value, what: &str) -> Result<String> {
    value
        .get("sdp")
        .and_then(|s| s.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::MalformedDescription(format!("missing sdp in {what}")))
}

/// Creates webrtc-rs transports for the negotiator.
pub struct RtcTransportFactory {
    config: NegotiationConfig,
    established_tx: Option<mpsc::Sender<(String, Arc<RTCPeerConnection>)>>,
}

impl RtcTransportFactory {
    pub fn new(config: NegotiationConfig) -> Self {
        Self {
            config,
            established_tx: None,
        }
    }

    /// Hand established peer connections off on `tx`, keyed by remote peer
    /// id. This is how a media/data layer receives the connected transport.
    pub fn with_established_channel(
        mut self,
        tx: mpsc::Sender<(String, Arc<RTCPeerConnection>)>,
    ) -> Self {
        self.established_tx = Some(tx);
        self
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(
        &self,
        remote_id: &str,
        notice_tx: mpsc::Sender<TransportNotice>,
    ) -> Result<Arc<dyn SessionTransport>> {
        let transport = RtcTransport::new(&self.config).await?;
        transport.wire_callbacks(
            remote_id.to_string(),
            notice_tx,
            self.established_tx.clone(),
        );
        Ok(transport)
    }
}
