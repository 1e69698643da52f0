use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::ratelimit::RateLimiter;
use crate::server::ChatServer;

/// Periodic housekeeping: evicts idle rate-limit windows and reaps hubs
/// with no local clients.
pub struct MaintenanceTask {
    interval: Duration,
    rate_limiter: Arc<RateLimiter>,
    chat: Arc<ChatServer>,
    shutdown: broadcast::Receiver<()>,
}

impl MaintenanceTask {
    pub fn new(
        interval: Duration,
        rate_limiter: Arc<RateLimiter>,
        chat: Arc<ChatServer>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            interval,
            rate_limiter,
            chat,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.interval);
        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(interval_secs = self.interval.as_secs(), "Maintenance task started");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Maintenance task received shutdown signal");
                    break;
                }
                _ = timer.tick() => self.run_once().await,
            }
        }

        tracing::info!("Maintenance task stopped");
    }

    async fn run_once(&self) {
        let evicted = if self.rate_limiter.is_enabled() {
            self.rate_limiter.cleanup_stale()
        } else {
            0
        };
        let reaped = self.chat.reap_idle_hubs().await;

        if evicted > 0 || reaped > 0 {
            tracing::debug!(
                evicted_windows = evicted,
                reaped_hubs = reaped,
                "Maintenance pass completed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{RateLimitConfig, SpamGuard};
    use crate::store::{ChannelInfo, MemoryStore};
    use crate::websocket::{ClientConfig, ClientContext};

    fn fixtures() -> (Arc<RateLimiter>, Arc<ChatServer>) {
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            idle_ttl: Duration::from_millis(10),
            ..Default::default()
        }));
        let store = Arc::new(MemoryStore::open());
        let ctx = ClientContext {
            config: ClientConfig::default(),
            rate_limiter: rate_limiter.clone(),
            spam_guard: Arc::new(SpamGuard::disabled()),
            store: store.clone(),
            moderation: store,
        };
        let chat = Arc::new(ChatServer::new(Arc::new(ctx), None, 16));
        (rate_limiter, chat)
    }

    #[tokio::test]
    async fn test_maintenance_task_shutdown() {
        let (rate_limiter, chat) = fixtures();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = MaintenanceTask::new(Duration::from_secs(60), rate_limiter, chat, shutdown_rx);

        let handle = tokio::spawn(task.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("task should stop")
            .expect("task should not panic");
    }

    #[tokio::test]
    async fn test_maintenance_pass_evicts_and_reaps() {
        let (rate_limiter, chat) = fixtures();
        let _ = rate_limiter.check("user-1");
        chat.hub(&ChannelInfo::public("general")).await.unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = MaintenanceTask::new(Duration::from_millis(50), rate_limiter.clone(), chat.clone(), shutdown_rx);
        let handle = tokio::spawn(task.run());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(rate_limiter.stats().tracked_users, 0);
        assert_eq!(chat.stats().active_channels, 0);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
