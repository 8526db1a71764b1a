//! Crate-wide error type.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the signaling service and the session negotiator.
///
/// The registry/relay variants are recoverable: they are reported to the
/// offending client and the connection stays open. The session variants are
/// terminal for the affected session only.
#[derive(Debug, Error)]
pub enum Error {
    /// Registration rejected: the id is empty.
    #[error("Invalid peer ID")]
    InvalidPeerId,

    /// Registration rejected: another live connection holds this id.
    #[error("Peer ID {0} already taken")]
    DuplicateId(String),

    /// The sending connection never completed registration.
    #[error("Peer not registered")]
    NotRegistered,

    /// A signal envelope is missing a required field.
    #[error("Invalid signal payload: {0}")]
    InvalidEnvelope(&'static str),

    /// The addressed peer is not currently registered.
    #[error("Peer {0} not found")]
    UnknownTarget(String),

    /// A session stayed in negotiation past its deadline.
    #[error("Negotiation timed out")]
    NegotiationTimeout,

    /// The transport rejected a remote session description.
    #[error("Malformed remote description: {0}")]
    MalformedDescription(String),

    /// The underlying transport reported a failure.
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// Configuration validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An internal channel endpoint went away.
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),
}
