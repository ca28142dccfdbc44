//! Relay shutdown: drain subscribers first, then stop the listener.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::hub::ProgressHub;

/// How long the listener and monitor tasks get to stop by default.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Owns the token that stops the HTTP listener.
///
/// Subscribers are not tied to the token. [`Self::graceful_shutdown`] closes
/// them through the hub before the listener goes away, so every client gets
/// the shutdown notice and a 1001 close frame.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Coordinator with an unfired token.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token the listener waits on.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop the listener without draining the hub first.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether the listener has been told to stop.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Close every subscriber, stop the listener, then wait up to `timeout`
    /// for `handles`.
    pub async fn graceful_shutdown(
        &self,
        hub: &ProgressHub,
        handles: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        let closed = hub.shutdown();
        self.shutdown();
        info!(
            closed,
            task_count = handles.len(),
            timeout_secs = timeout.as_secs(),
            "relay draining"
        );

        let drain = futures::future::join_all(handles);
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("relay tasks still running after {timeout:?}");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::ServerConfig;
    use crate::status::NoStatusSource;
    use crate::websocket::connection::ConnectionMeta;
    use crate::websocket::transport::{self, CloseCode};

    fn hub() -> Arc<ProgressHub> {
        Arc::new(ProgressHub::new(ServerConfig::default(), Arc::new(NoStatusSource)))
    }

    #[test]
    fn listener_token_starts_live() {
        let coord = ShutdownCoordinator::default();
        assert!(!coord.is_shutting_down());
        assert!(!coord.token().is_cancelled());
    }

    #[test]
    fn stopping_listener_leaves_hub_open() {
        let coord = ShutdownCoordinator::new();
        let hub = hub();
        coord.shutdown();
        coord.shutdown();
        assert!(coord.token().is_cancelled());
        assert!(!hub.is_shutting_down());
    }

    #[tokio::test]
    async fn subscribers_closed_before_listener_stops() {
        let coord = ShutdownCoordinator::new();
        let hub = hub();
        let (tx, _rx) = transport::channel(8);
        let conn = hub
            .admit("intent-1", tx, None, ConnectionMeta::default())
            .await
            .unwrap();

        let token = coord.token();
        let observer = Arc::clone(&hub);
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
        let listener = tokio::spawn(async move {
            token.cancelled().await;
            let _ = seen_tx.send((
                observer.is_shutting_down(),
                observer.subscriber_count("intent-1"),
            ));
        });

        coord.graceful_shutdown(&hub, vec![listener], None).await;
        assert!(coord.is_shutting_down());
        // the hub was already drained when the token fired
        assert_eq!(seen_rx.await.unwrap(), (true, 0));
        assert_eq!(conn.closure().unwrap().code, CloseCode::ServerShutdown);
    }

    #[tokio::test]
    async fn stuck_task_does_not_block_exit() {
        let coord = ShutdownCoordinator::new();
        let hub = hub();
        let stuck = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });
        coord
            .graceful_shutdown(&hub, vec![stuck], Some(Duration::from_millis(100)))
            .await;
        assert!(coord.is_shutting_down());
        assert!(hub.is_shutting_down());
    }
}
