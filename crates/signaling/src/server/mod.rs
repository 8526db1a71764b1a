//! Rendezvous server: registers peers and relays negotiation envelopes.

mod handler;
mod registry;
mod relay;

pub use registry::{PeerRegistration, PeerRegistry, PeerSender};
pub use relay::SignalRelay;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::Result;

/// Handle to a running signaling server.
///
/// Accepts WebSocket connections and serves the register/signal protocol
/// until [`shutdown`](SignalingServer::shutdown) is called. Each connection
/// runs on its own task; all of them share one [`PeerRegistry`].
pub struct SignalingServer {
    local_addr: SocketAddr,
    registry: Arc<PeerRegistry>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl SignalingServer {
    /// Bind the listener and start accepting connections. Binding port 0
    /// picks a free port; see [`local_addr`](SignalingServer::local_addr).
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let registry = Arc::new(PeerRegistry::new());
        let state = Arc::new(handler::ServerState {
            relay: SignalRelay::new(Arc::clone(&registry)),
            registry: Arc::clone(&registry),
        });

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        info!("Signaling server listening on {}", local_addr);

        let accept_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        // A dropped handle counts as shutdown too.
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, _)) => {
                                let state = Arc::clone(&state);
                                tokio::spawn(async move {
                                    if let Err(e) = handler::handle_connection(stream, state).await {
                                        debug!("Connection ended: {}", e);
                                    }
                                });
                            }
                            Err(e) => warn!("Accept failed: {}", e),
                        }
                    }
                }
            }
            info!("Signaling server stopped accepting connections");
        });

        Ok(Self {
            local_addr,
            registry,
            shutdown_tx,
            accept_task,
        })
    }

    /// The address the server actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The shared membership registry.
    pub fn registry(&self) -> Arc<PeerRegistry> {
        Arc::clone(&self.registry)
    }

    /// Stop accepting new connections and wait for the accept loop to end.
    /// Established connections keep running until their clients disconnect.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.accept_task.await;
    }
}
