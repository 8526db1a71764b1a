//! Scripted transports for exercising negotiation without real ICE.

use std::sync::{Arc, Mutex};

use airlink_signaling::{
    Result, SessionTransport, TransportFactory, TransportNotice, TransportStatus,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// Transport that completes the description exchange with canned SDP,
/// surfaces one local candidate alongside it, and reports connectivity as
/// soon as both descriptions are in place.
pub struct LoopTransport {
    label: String,
    notice_tx: mpsc::Sender<TransportNotice>,
    candidates: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl SessionTransport for LoopTransport {
    async fn create_offer(&self) -> Result<Value> {
        let _ = self
            .notice_tx
            .send(TransportNotice::LocalCandidate(json!({
                "candidate": format!("host-{}", self.label)
            })))
            .await;
        Ok(json!({"type": "offer", "sdp": format!("v=0 offer-from-{}", self.label)}))
    }

    async fn accept_offer(&self, _offer: Value) -> Result<Value> {
        let _ = self
            .notice_tx
            .send(TransportNotice::LocalCandidate(json!({
                "candidate": format!("host-{}", self.label)
            })))
            .await;
        let _ = self
            .notice_tx
            .send(TransportNotice::Status(TransportStatus::Connected))
            .await;
        Ok(json!({"type": "answer", "sdp": format!("v=0 answer-from-{}", self.label)}))
    }

    async fn accept_answer(&self, _answer: Value) -> Result<()> {
        let _ = self
            .notice_tx
            .send(TransportNotice::Status(TransportStatus::Connected))
            .await;
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: Value) -> Result<()> {
        self.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn close(&self) {}
}

/// Factory producing [`LoopTransport`]s and recording every remote
/// candidate they were asked to apply.
pub struct LoopFactory {
    label: String,
    pub candidates: Arc<Mutex<Vec<Value>>>,
}

impl LoopFactory {
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            candidates: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn applied_candidates(&self) -> Vec<Value> {
        self.candidates.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransportFactory for LoopFactory {
    async fn create(
        &self,
        _remote_id: &str,
        notice_tx: mpsc::Sender<TransportNotice>,
    ) -> Result<Arc<dyn SessionTransport>> {
        Ok(Arc::new(LoopTransport {
            label: self.label.clone(),
            notice_tx,
            candidates: Arc::clone(&self.candidates),
        }))
    }
}
