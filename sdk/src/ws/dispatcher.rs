//! Send-or-queue dispatch of outbound frames.
//!
//! The dispatcher owns the [`MessageQueue`] and, while a socket is open, a
//! handle to it. Frames go straight to the socket when one is available and
//! fall back to the queue otherwise. Opening a channel drains the queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info};

use super::messages::{ack_payload, ping_payload, ACK, ECHO, PING};
use crate::queue::{DrainReport, EnqueueOptions, EnqueueOutcome, Expiry, MessageQueue, Priority};
use crate::transport::FrameSink;

/// Pings older than this are not worth sending.
pub const PING_TTL: Duration = Duration::from_secs(30);

/// Result of [`Dispatcher::send_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the open socket.
    Sent,
    /// Deferred to the queue.
    Queued(EnqueueOutcome),
}

/// Routes outbound frames to the open channel or the queue.
pub struct Dispatcher {
    queue: Arc<MessageQueue>,
    channel: RwLock<Option<Arc<dyn FrameSink>>>,
    queued: Notify,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher with no open channel.
    #[must_use]
    pub fn new(queue: Arc<MessageQueue>) -> Self {
        Self {
            queue,
            channel: RwLock::new(None),
            queued: Notify::new(),
        }
    }

    /// Returns the queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }

    /// Returns true while a channel is installed.
    pub async fn is_open(&self) -> bool {
        self.channel.read().await.is_some()
    }

    /// Sends a frame now if possible, otherwise queues it.
    pub async fn send_message(
        &self,
        kind: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> SendOutcome {
        let channel = self.channel.read().await.clone();

        if let Some(channel) = channel {
            match channel.send_frame(kind, &payload).await {
                Ok(()) => return SendOutcome::Sent,
                Err(e) => {
                    debug!(kind, error = %e, "immediate send failed, queueing");
                }
            }
        }

        let outcome = self.queue.enqueue(kind, payload, options).await;
        if outcome.is_queued() {
            self.queued.notify_one();
        }
        SendOutcome::Queued(outcome)
    }

    /// Resolves once a message has been queued since the last call.
    pub async fn queued(&self) {
        self.queued.notified().await;
    }

    /// Installs a channel and drains the queue through it.
    pub async fn on_open(&self, channel: Arc<dyn FrameSink>) -> DrainReport {
        *self.channel.write().await = Some(Arc::clone(&channel));

        let report = self.queue.drain(channel.as_ref()).await;
        if report.delivered > 0 || report.dropped > 0 {
            info!(
                delivered = report.delivered,
                retried = report.retried,
                dropped = report.dropped,
                "drained queue on open"
            );
        }
        report
    }

    /// Removes the channel.
    pub async fn on_close(&self) {
        *self.channel.write().await = None;
    }

    /// Drains again when a retry comes due. `None` without a channel.
    pub async fn redeliver(&self) -> Option<DrainReport> {
        let channel = self.channel.read().await.clone()?;
        Some(self.queue.drain(channel.as_ref()).await)
    }

    /// Removes expired messages from the queue.
    pub async fn sweep_expired(&self) -> usize {
        self.queue.sweep_expired().await
    }

    /// Sends an application ping.
    pub async fn ping(&self) -> SendOutcome {
        let options = EnqueueOptions::with_priority(Priority::Low)
            .max_retries(0)
            .expires(Expiry::After(PING_TTL));
        self.send_message(PING, ping_payload(Utc::now()), options)
            .await
    }

    /// Sends a diagnostic echo.
    pub async fn echo(&self, data: Value) -> SendOutcome {
        self.send_message(ECHO, data, EnqueueOptions::default())
            .await
    }

    /// Acknowledges a notification.
    pub async fn acknowledge(&self, notification_id: i64) -> SendOutcome {
        self.send_message(
            ACK,
            ack_payload(notification_id),
            EnqueueOptions::with_priority(Priority::High),
        )
        .await
    }
}
