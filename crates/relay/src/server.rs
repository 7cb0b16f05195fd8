//! Relay server
//!
//! Binds the listener and serves the relay handler on every path. Each
//! upgraded connection runs its relay in its own task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::{handle, RelayConfig, RelayState};

/// Router serving the relay handler for any path and method
pub fn router(state: Arc<RelayState>) -> Router {
    Router::new().fallback(handle).with_state(state)
}

/// Relay server
pub struct RelayServer {
    listen_addr: SocketAddr,
    state: Arc<RelayState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    /// Handle for the serve task
    handle: Option<JoinHandle<()>>,
}

impl RelayServer {
    pub fn new(listen_addr: SocketAddr, config: RelayConfig) -> Self {
        Self {
            listen_addr,
            state: Arc::new(RelayState::new(config)),
            shutdown_tx: None,
            handle: None,
        }
    }

    /// Bind and start serving.
    ///
    /// Returns once the listener is bound; the server runs in a background
    /// task. With port 0 the actual port is available from `listen_addr()`.
    pub async fn start(&mut self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.listen_addr).await?;
        let actual_addr = listener.local_addr()?;
        info!("Relay listening on {}", actual_addr);
        self.listen_addr = actual_addr;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        self.shutdown_tx = Some(shutdown_tx);

        let app = router(self.state.clone());
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                error!("Relay server error: {}", e);
            }
        });

        self.handle = Some(handle);
        Ok(())
    }

    /// Stop accepting, then wait up to `drain` for running sessions.
    ///
    /// Returns true if every session finished in time.
    pub async fn shutdown(&mut self, drain: Duration) -> bool {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Relay serve task ended abnormally: {}", e);
            }
        }

        let active = self.state.sessions().count();
        if active > 0 {
            info!("Waiting for {} active sessions", active);
        }

        match tokio::time::timeout(drain, self.state.sessions().wait_idle()).await {
            Ok(()) => {
                info!("Relay stopped");
                true
            }
            Err(_) => {
                warn!(
                    "Relay stopped with {} sessions still open",
                    self.state.sessions().count()
                );
                false
            }
        }
    }

    /// Abort the serve task without draining
    pub fn stop(&mut self) {
        self.shutdown_tx.take();
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!("Relay stopped");
        }
    }

    /// Get the listening address
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Number of relays currently running
    pub fn active_sessions(&self) -> usize {
        self.state.sessions().count()
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_server_creation() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = RelayServer::new(addr, RelayConfig::default());
        assert_eq!(server.listen_addr().port(), 0);
        assert_eq!(server.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_start_binds_ephemeral_port() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut server = RelayServer::new(addr, RelayConfig::default());
        server.start().await.unwrap();
        assert_ne!(server.listen_addr().port(), 0);

        let drained = server.shutdown(Duration::from_secs(1)).await;
        assert!(drained);
    }
}
