//! Peer-to-peer session signaling for drone ground control links.
//!
//! Two halves share this crate:
//!
//! - the rendezvous service ([`SignalingServer`]): registers peers under
//!   unique ids, relays negotiation envelopes between them, and pushes
//!   membership updates to everyone, and
//! - the client side ([`Endpoint`] over [`Negotiator`]): a per-remote-peer
//!   state machine that turns relayed offers, answers, and ICE candidates
//!   into an established WebRTC transport.
//!
//! The relay never looks inside envelopes and keeps no session state; the
//! negotiation state machines live entirely in the clients. What happens on
//! the established transport (video tracks, telemetry data channels) is the
//! consumer's business.

pub mod client;
pub mod config;
pub mod endpoint;
mod error;
pub mod protocol;
pub mod server;
pub mod session;

pub use client::{ClientEvent, SignalingClient};
pub use config::NegotiationConfig;
pub use endpoint::{Endpoint, EndpointEvent};
pub use error::{Error, Result};
pub use protocol::{ClientMessage, OutboundSignal, ServerMessage, SignalKind};
pub use server::{PeerRegistration, PeerRegistry, PeerSender, SignalRelay, SignalingServer};
pub use session::{
    FailureReason, NegotiationEvent, Negotiator, RtcTransport, RtcTransportFactory, SessionState,
    SessionTransport, TransportFactory, TransportNotice, TransportStatus,
};
