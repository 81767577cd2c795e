//! Periodic eviction of idle sessions.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::traits::SessionStore;

/// Background task that sweeps expired sessions on a fixed interval.
///
/// The sweep interval and the idle threshold are independent: sweeping
/// hourly bounds memory growth while sessions live for a day of inactivity.
pub struct SessionSweeper {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SessionSweeper {
    /// Start sweeping `store` every `interval`, evicting sessions idle for
    /// longer than `max_idle`. Must be called from within a tokio runtime.
    pub fn spawn(store: Arc<dyn SessionStore>, interval: Duration, max_idle: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let period = interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = store.sweep_expired(Utc::now(), max_idle);
                        if removed > 0 {
                            tracing::info!(removed, remaining = store.len(), "expired idle sessions");
                        } else {
                            tracing::debug!(remaining = store.len(), "session sweep found nothing to expire");
                        }
                    }
                }
            }
            tracing::debug!("session sweeper stopped");
        });

        Self { cancel, handle }
    }

    /// Stop the sweeper and wait for the task to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!("session sweeper task ended abnormally: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::InMemorySessionStore;

    #[tokio::test]
    async fn sweeper_evicts_idle_sessions() {
        let store = Arc::new(InMemorySessionStore::new());
        store.get_or_create("idle", Utc::now() - chrono::Duration::hours(2));
        store.get_or_create("active", Utc::now());

        let sweeper = SessionSweeper::spawn(
            store.clone(),
            Duration::from_millis(10),
            Duration::from_secs(60 * 60),
        );

        for _ in 0..100 {
            if store.get("idle").is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(store.get("idle").is_none());
        assert!(store.get("active").is_some());
        sweeper.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_the_task() {
        let store = Arc::new(InMemorySessionStore::new());
        let sweeper =
            SessionSweeper::spawn(store, Duration::from_secs(3600), Duration::from_secs(60));
        tokio::time::timeout(Duration::from_secs(5), sweeper.shutdown())
            .await
            .expect("sweeper should stop promptly after shutdown");
    }
}
