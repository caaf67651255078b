//! Heartbeat sweep that evicts unresponsive connections.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use super::registry::{ConnectionRegistry, EvictReason};

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Pings queued this round.
    pub pinged: usize,
    /// Connections evicted this round.
    pub evicted: usize,
}

/// Periodically pings every connection and evicts those that stay silent
/// for a whole interval.
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
}

impl LivenessMonitor {
    /// Creates a monitor sweeping at the given interval.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Returns the sweep interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs one sweep.
    pub async fn sweep(&self) -> SweepReport {
        let (stale, pinged) = self.registry.heartbeat_round().await;

        let mut evicted = 0;
        for id in stale {
            if self.registry.evict(id, EvictReason::HeartbeatTimeout).await {
                evicted += 1;
            }
        }

        if evicted > 0 {
            info!(evicted, pinged, "liveness sweep evicted connections");
        } else {
            debug!(pinged, "liveness sweep");
        }

        SweepReport { pinged, evicted }
    }

    /// Sweeps on every tick until `shutdown` turns true or its sender is
    /// dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        info!(interval_secs = self.interval.as_secs(), "liveness monitor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("liveness monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;
    use crate::ws::connection::{close_code, Connection, Outbound};
    use tokio::sync::mpsc;

    fn monitor() -> (LivenessMonitor, Arc<ConnectionRegistry>) {
        let registry = Arc::new(ConnectionRegistry::default());
        (
            LivenessMonitor::new(Arc::clone(&registry), Duration::from_secs(30)),
            registry,
        )
    }

    #[tokio::test]
    async fn test_silent_connection_evicted_after_two_sweeps() {
        let (monitor, registry) = monitor();
        let (tx, mut rx) = mpsc::channel(8);
        let id = registry
            .register(Connection::new(Identity::new("u", "guard", "v"), tx))
            .await;

        let first = monitor.sweep().await;
        assert_eq!(first, SweepReport { pinged: 1, evicted: 0 });
        assert!(registry.contains(id).await);

        let second = monitor.sweep().await;
        assert_eq!(second, SweepReport { pinged: 0, evicted: 1 });
        assert!(!registry.contains(id).await);

        assert_eq!(rx.recv().await, Some(Outbound::Ping));
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Close {
                code: close_code::GOING_AWAY,
                reason: "heartbeat timeout",
            })
        );
        // Sender dropped: the writer task would stop here.
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_pong_between_sweeps_keeps_connection() {
        let (monitor, registry) = monitor();
        let (tx, _rx) = mpsc::channel(8);
        let id = registry
            .register(Connection::new(Identity::new("u", "guard", "v"), tx))
            .await;

        for _ in 0..3 {
            monitor.sweep().await;
            registry.record_pong(id).await;
        }

        assert!(registry.contains(id).await);
    }

    #[tokio::test]
    async fn test_unqueueable_ping_evicts() {
        let (monitor, registry) = monitor();
        let (tx, _rx) = mpsc::channel(1);
        let conn = Connection::new(Identity::new("u", "guard", "v"), tx);
        assert!(conn.try_send(Outbound::Ping));
        let id = registry.register(conn).await;

        let report = monitor.sweep().await;
        assert_eq!(report.evicted, 1);
        assert!(!registry.contains(id).await);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (monitor, _registry) = monitor();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(monitor.run(shutdown_rx));
        shutdown_tx.send(true).expect("send shutdown");

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("monitor stopped")
            .expect("join");
    }
}
