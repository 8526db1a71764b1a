//! Negotiation configuration.

use std::time::Duration;

use crate::{Error, Result};

/// Configuration for session negotiation transports.
#[derive(Debug, Clone)]
pub struct NegotiationConfig {
    /// STUN servers used for ICE candidate discovery.
    pub stun_servers: Vec<String>,
    /// How long a session may stay in negotiation before it fails.
    pub negotiation_timeout: Duration,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            negotiation_timeout: Duration::from_secs(30),
        }
    }
}

impl NegotiationConfig {
    /// Validate the configuration, returning a descriptive error on the
    /// first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.negotiation_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "negotiation_timeout must be non-zero".to_string(),
            ));
        }
        for server in &self.stun_servers {
            if server.is_empty() {
                return Err(Error::InvalidConfig(
                    "stun_servers entries must be non-empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}
