//! WebSocket metrics tracking.
//!
//! Provides atomic counters for monitoring connections, fan-out and
//! evictions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Metrics for the WebSocket server.
#[derive(Debug)]
pub struct WsMetrics {
    /// Total connections opened.
    connections_opened: AtomicU64,

    /// Total connections closed.
    connections_closed: AtomicU64,

    /// Handshakes rejected for a missing or invalid credential.
    auth_rejections: AtomicU64,

    /// Total messages received.
    messages_received: AtomicU64,

    /// Total frames written to sockets.
    messages_sent: AtomicU64,

    /// Broadcast calls.
    broadcasts: AtomicU64,

    /// Connections evicted by the registry.
    evictions: AtomicU64,

    /// Acknowledgements received from clients.
    acks: AtomicU64,

    /// Total errors.
    errors: AtomicU64,

    /// Start time for rate calculation.
    start_time: Instant,
}

impl Default for WsMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl WsMetrics {
    /// Creates a new metrics instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections_opened: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            auth_rejections: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            broadcasts: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            acks: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Records a connection opened.
    pub fn record_connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a connection closed.
    pub fn record_connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a rejected handshake.
    pub fn record_auth_rejected(&self) {
        self.auth_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a message received.
    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a message sent.
    pub fn record_message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a broadcast call.
    pub fn record_broadcast(&self) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an eviction.
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a client acknowledgement.
    pub fn record_ack(&self) {
        self.acks.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an error.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the total connections opened.
    #[must_use]
    pub fn connections_opened(&self) -> u64 {
        self.connections_opened.load(Ordering::Relaxed)
    }

    /// Returns the total connections closed.
    #[must_use]
    pub fn connections_closed(&self) -> u64 {
        self.connections_closed.load(Ordering::Relaxed)
    }

    /// Returns the current active connections.
    #[must_use]
    pub fn active_connections(&self) -> u64 {
        self.connections_opened()
            .saturating_sub(self.connections_closed())
    }

    /// Returns the total rejected handshakes.
    #[must_use]
    pub fn auth_rejections(&self) -> u64 {
        self.auth_rejections.load(Ordering::Relaxed)
    }

    /// Returns the total messages received.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Returns the total messages sent.
    #[must_use]
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Returns the total broadcast calls.
    #[must_use]
    pub fn broadcasts(&self) -> u64 {
        self.broadcasts.load(Ordering::Relaxed)
    }

    /// Returns the total evictions.
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Returns the total acknowledgements.
    #[must_use]
    pub fn acks(&self) -> u64 {
        self.acks.load(Ordering::Relaxed)
    }

    /// Returns the total errors.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Returns the uptime in seconds.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Returns a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> WsMetricsSnapshot {
        WsMetricsSnapshot {
            connections_opened: self.connections_opened(),
            connections_closed: self.connections_closed(),
            active_connections: self.active_connections(),
            auth_rejections: self.auth_rejections(),
            messages_received: self.messages_received(),
            messages_sent: self.messages_sent(),
            broadcasts: self.broadcasts(),
            evictions: self.evictions(),
            acks: self.acks(),
            errors: self.errors(),
            uptime_secs: self.uptime_secs(),
        }
    }
}

/// A point-in-time snapshot of WebSocket metrics.
#[derive(Debug, Clone, Serialize)]
pub struct WsMetricsSnapshot {
    /// Total connections opened.
    pub connections_opened: u64,
    /// Total connections closed.
    pub connections_closed: u64,
    /// Active connections.
    pub active_connections: u64,
    /// Rejected handshakes.
    pub auth_rejections: u64,
    /// Messages received.
    pub messages_received: u64,
    /// Messages sent.
    pub messages_sent: u64,
    /// Broadcast calls.
    pub broadcasts: u64,
    /// Evicted connections.
    pub evictions: u64,
    /// Acknowledgements.
    pub acks: u64,
    /// Errors.
    pub errors: u64,
    /// Uptime in seconds.
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = WsMetrics::new();
        assert_eq!(metrics.connections_opened(), 0);
        assert_eq!(metrics.connections_closed(), 0);
        assert_eq!(metrics.active_connections(), 0);
    }

    #[test]
    fn test_metrics_record_connection() {
        let metrics = WsMetrics::new();

        metrics.record_connection_opened();
        metrics.record_connection_opened();
        assert_eq!(metrics.active_connections(), 2);

        metrics.record_connection_closed();
        assert_eq!(metrics.connections_closed(), 1);
        assert_eq!(metrics.active_connections(), 1);
    }

    #[test]
    fn test_metrics_active_never_negative() {
        let metrics = WsMetrics::new();
        metrics.record_connection_closed();
        assert_eq!(metrics.active_connections(), 0);
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = WsMetrics::new();

        metrics.record_connection_opened();
        metrics.record_auth_rejected();
        metrics.record_message_received();
        metrics.record_message_sent();
        metrics.record_broadcast();
        metrics.record_eviction();
        metrics.record_ack();

        let snapshot = metrics.snapshot();

        assert_eq!(snapshot.connections_opened, 1);
        assert_eq!(snapshot.active_connections, 1);
        assert_eq!(snapshot.auth_rejections, 1);
        assert_eq!(snapshot.messages_received, 1);
        assert_eq!(snapshot.messages_sent, 1);
        assert_eq!(snapshot.broadcasts, 1);
        assert_eq!(snapshot.evictions, 1);
        assert_eq!(snapshot.acks, 1);
        assert_eq!(snapshot.errors, 0);
    }
}
