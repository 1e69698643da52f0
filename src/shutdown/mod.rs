//! Graceful shutdown for the chat service.
//!
//! 1. Stop background maintenance tasks
//! 2. Refuse new upgrades and shut every hub down (clients get close 1001)
//! 3. Wait, bounded, for running connections to flush and close

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::server::ChatServer;

/// Outcome of a shutdown
#[derive(Debug, Clone, Default)]
pub struct ShutdownResult {
    pub hubs_closed: usize,
    /// Clients told to close by their hub
    pub clients_signalled: usize,
    /// Connections that finished within the drain timeout
    pub connections_drained: usize,
    /// Connections still running when the drain timeout expired
    pub remaining: usize,
    pub duration: Duration,
}

impl ShutdownResult {
    pub fn is_clean(&self) -> bool {
        self.remaining == 0
    }
}

pub struct GracefulShutdown {
    chat: Arc<ChatServer>,
    shutdown_tx: broadcast::Sender<()>,
    drain_timeout: Duration,
}

impl GracefulShutdown {
    pub fn new(chat: Arc<ChatServer>, shutdown_tx: broadcast::Sender<()>, drain_timeout: Duration) -> Self {
        Self {
            chat,
            shutdown_tx,
            drain_timeout,
        }
    }

    /// Execute the shutdown sequence
    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(total_connections = self.chat.active_connections())
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Stopping background tasks");
        let _ = self.shutdown_tx.send(());

        tracing::info!(
            drain_timeout_secs = self.drain_timeout.as_secs(),
            "Phase 2: Closing hubs and draining connections"
        );
        let result = self.chat.shutdown(self.drain_timeout).await;

        tracing::info!(
            hubs_closed = result.hubs_closed,
            clients_signalled = result.clients_signalled,
            connections_drained = result.connections_drained,
            remaining = result.remaining,
            duration_ms = result.duration.as_millis(),
            "Graceful shutdown completed"
        );

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_result_default_is_clean() {
        let result = ShutdownResult::default();
        assert!(result.is_clean());
        assert_eq!(result.hubs_closed, 0);
    }

    #[test]
    fn test_shutdown_result_with_remaining() {
        let result = ShutdownResult {
            remaining: 2,
            ..Default::default()
        };
        assert!(!result.is_clean());
    }
}
