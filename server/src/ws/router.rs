//! Fan-out of notifications to connected staff.
//!
//! Delivery is best-effort and at-most-once per open connection: a frame is
//! serialized once, queued without waiting into each target's outbound
//! buffer, and any connection whose buffer is closed or full is evicted
//! instead of retried. Clients recover missed notifications by re-fetching
//! after they reconnect.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::connection::{ConnectionId, Outbound};
use super::messages::ServerMessage;
use super::metrics::WsMetrics;
use super::registry::{ConnectionRegistry, EvictReason};
use crate::notification::{Audience, NotificationCount, OutboundNotification};

/// Outcome of a broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Connections matched by the audience.
    pub targeted: usize,
    /// Connections the frame was queued for.
    pub delivered: usize,
    /// Connections evicted because the frame could not be queued.
    pub evicted: usize,
}

/// Routes server messages to users and groups.
#[derive(Debug, Clone)]
pub struct BroadcastRouter {
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<WsMetrics>,
}

impl BroadcastRouter {
    /// Creates a router over the given registry.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        let metrics = registry.metrics();
        Self { registry, metrics }
    }

    /// Sends a message to every connection of a user.
    pub async fn broadcast_to_user(&self, user_id: &str, message: &ServerMessage) -> BroadcastReport {
        let targets = self.registry.senders_for_user(user_id).await;
        let report = self.fan_out(targets, message).await;

        debug!(
            user_id = %user_id,
            kind = message.kind(),
            targeted = report.targeted,
            delivered = report.delivered,
            "broadcast to user"
        );
        report
    }

    /// Sends a message to every connection with the given role in a scope.
    pub async fn broadcast_to_group(
        &self,
        scope_key: &str,
        role: &str,
        message: &ServerMessage,
    ) -> BroadcastReport {
        let targets = self.registry.senders_for_group(scope_key, role).await;
        let report = self.fan_out(targets, message).await;

        debug!(
            scope_key = %scope_key,
            role = %role,
            kind = message.kind(),
            targeted = report.targeted,
            delivered = report.delivered,
            "broadcast to group"
        );
        report
    }

    /// Routes a notification to its audience.
    pub async fn publish(&self, notification: &OutboundNotification) -> BroadcastReport {
        let message = ServerMessage::notification(notification.to_payload());

        match &notification.audience {
            Audience::User { user_id } => self.broadcast_to_user(user_id, &message).await,
            Audience::Group { scope_key, role } => {
                self.broadcast_to_group(scope_key, role, &message).await
            }
        }
    }

    /// Sends updated counters to a user.
    pub async fn publish_count(&self, user_id: &str, count: NotificationCount) -> BroadcastReport {
        let message = ServerMessage::notification_count(count.total, count.unread);
        self.broadcast_to_user(user_id, &message).await
    }

    async fn fan_out(
        &self,
        targets: Vec<(ConnectionId, mpsc::Sender<Outbound>)>,
        message: &ServerMessage,
    ) -> BroadcastReport {
        self.metrics.record_broadcast();

        let mut report = BroadcastReport {
            targeted: targets.len(),
            ..BroadcastReport::default()
        };
        if targets.is_empty() {
            return report;
        }

        let frame = match Outbound::json(message) {
            Ok(frame) => frame,
            Err(e) => {
                error!(kind = message.kind(), error = %e, "failed to serialize broadcast");
                self.metrics.record_error();
                return report;
            }
        };

        let mut failed = Vec::new();
        for (id, sender) in targets {
            if sender.try_send(frame.clone()).is_ok() {
                report.delivered += 1;
            } else {
                failed.push(id);
            }
        }

        for id in failed {
            warn!(connection_id = id, "outbound buffer unavailable, evicting");
            if self.registry.evict(id, EvictReason::SendFailed).await {
                report.evicted += 1;
            }
        }

        report
    }
}
