//! Wire protocol for the rendezvous server.
//!
//! One JSON object per WebSocket text frame, internally tagged on `event`:
//!
//! ```text
//! {"event":"register","peer_id":"drone1"}
//! {"event":"signal","to":"drone1","type":"offer","payload":{...}}
//! {"event":"peers-update","peers":["groundstation","drone1"]}
//! ```
//!
//! The relay never interprets `type` or `payload`; it forwards both verbatim
//! after stamping `from` with the sender identity it recorded at
//! registration. Clients parse `type` into [`SignalKind`] at the negotiation
//! layer and drop kinds they do not understand.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// Negotiation signal types understood by the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice-candidate",
        }
    }

    /// Parse a wire `type` value. Unknown kinds return `None` so callers can
    /// drop them without failing the whole message.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "offer" => Some(SignalKind::Offer),
            "answer" => Some(SignalKind::Answer),
            "ice-candidate" => Some(SignalKind::IceCandidate),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Messages a client sends to the server.
///
/// The `signal` fields default when absent so an incomplete envelope reaches
/// the relay's validation instead of failing to parse; any client-supplied
/// `from` field is ignored by deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Claim a peer id for this connection.
    Register { peer_id: String },
    /// Ask the relay to forward a negotiation envelope.
    Signal {
        #[serde(default)]
        to: String,
        #[serde(rename = "type", default)]
        kind: String,
        #[serde(default)]
        payload: Value,
    },
    /// Request the current membership list (sent back as `peers-update`).
    ListPeers,
}

/// Messages the server sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Registration acknowledgement.
    Registered { peer_id: String },
    /// Relayed envelope. `from` is always the server-observed sender.
    Signal {
        from: String,
        #[serde(rename = "type")]
        kind: String,
        payload: Value,
    },
    /// Full membership replace, pushed after every change.
    PeersUpdate { peers: Vec<String> },
    /// Error report for something this client sent.
    Error { message: String },
}

impl ClientMessage {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

impl ServerMessage {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// An envelope a session wants delivered through the relay.
#[derive(Debug, Clone)]
pub struct OutboundSignal {
    pub to: String,
    pub kind: SignalKind,
    pub payload: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn register_wire_shape() {
        let msg = ClientMessage::Register {
            peer_id: "drone1".to_string(),
        };
        assert_eq!(
            msg.encode().unwrap(),
            r#"{"event":"register","peer_id":"drone1"}"#
        );
    }

    #[test]
    fn signal_kind_round_trip() {
        for kind in [SignalKind::Offer, SignalKind::Answer, SignalKind::IceCandidate] {
            assert_eq!(SignalKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(SignalKind::parse("renegotiate"), None);
        assert_eq!(SignalKind::parse(""), None);
    }

    #[test]
    fn signal_missing_fields_default() {
        let msg = ClientMessage::decode(r#"{"event":"signal","to":"drone1"}"#).unwrap();
        match msg {
            ClientMessage::Signal { to, kind, payload } => {
                assert_eq!(to, "drone1");
                assert!(kind.is_empty());
                assert!(payload.is_null());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn client_supplied_from_is_ignored() {
        let msg = ClientMessage::decode(
            r#"{"event":"signal","from":"mallory","to":"drone1","type":"offer","payload":{"sdp":"x"}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Signal { to, kind, .. } => {
                assert_eq!(to, "drone1");
                assert_eq!(kind, "offer");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn peers_update_wire_shape() {
        let msg = ServerMessage::PeersUpdate {
            peers: vec!["groundstation".to_string(), "drone1".to_string()],
        };
        let decoded = ServerMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert!(msg.encode().unwrap().contains(r#""event":"peers-update""#));
    }

    #[test]
    fn relayed_signal_carries_payload_verbatim() {
        let payload = json!({"candidate": "candidate:1 1 udp 2122260223 10.0.0.1 5000 typ host"});
        let msg = ServerMessage::Signal {
            from: "groundstation".to_string(),
            kind: "ice-candidate".to_string(),
            payload: payload.clone(),
        };
        match ServerMessage::decode(&msg.encode().unwrap()).unwrap() {
            ServerMessage::Signal { from, kind, payload: p } => {
                assert_eq!(from, "groundstation");
                assert_eq!(kind, "ice-candidate");
                assert_eq!(p, payload);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
