//! Deduplicating priority queue with retry and expiry.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::config::{ConfigError, QueueConfig};
use super::message::{
    message_id, EnqueueOptions, EnqueueOutcome, MessageState, Priority, QueuedMessage,
};
use crate::backoff::Backoff;
use crate::clock::Clock;
use crate::transport::FrameSink;

/// Sort key: priority descending, then enqueue time, then insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey(Reverse<Priority>, Instant, u64);

impl OrderKey {
    const fn priority(&self) -> Priority {
        self.0 .0
    }
}

/// Outcome of a drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Messages delivered.
    pub delivered: usize,
    /// Failed messages scheduled for another attempt.
    pub retried: usize,
    /// Messages dropped after exhausting their retries.
    pub dropped: usize,
    /// Expired messages removed during the pass.
    pub expired: usize,
    /// True if another drain was already running.
    pub skipped: bool,
    /// Earliest scheduled retry still pending.
    pub next_retry_at: Option<Instant>,
}

impl DrainReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    entries: BTreeMap<OrderKey, QueuedMessage>,
    keys: HashMap<String, OrderKey>,
    /// First enqueue time of every id seen within the dedup window.
    seen: HashMap<String, Instant>,
    next_seq: u64,
}

impl QueueState {
    fn remove(&mut self, id: &str) -> Option<QueuedMessage> {
        let key = self.keys.remove(id)?;
        self.entries.remove(&key)
    }

    /// Oldest entry of the lowest priority class present, skipping in-flight
    /// entries.
    fn eviction_candidate(&self) -> Option<OrderKey> {
        let lowest = self
            .entries
            .iter()
            .filter(|(_, m)| m.state == MessageState::Pending)
            .map(|(k, _)| k.priority())
            .min()?;

        self.entries
            .iter()
            .find(|(k, m)| k.priority() == lowest && m.state == MessageState::Pending)
            .map(|(k, _)| *k)
    }

    fn remove_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|m| m.is_expired(now))
            .map(|m| m.id.clone())
            .collect();

        for id in &expired {
            self.remove(id);
            debug!(message_id = %id, "queued message expired");
        }
        expired.len()
    }

    /// Returns in-flight entries to pending. Only valid while no drain is
    /// running; a drain cancelled mid-send leaves its entry in flight.
    fn release_in_flight(&mut self) -> usize {
        let mut released = 0;
        for message in self.entries.values_mut() {
            if message.state == MessageState::InFlight {
                message.state = MessageState::Pending;
                released += 1;
            }
        }
        released
    }

    /// Marks the first ready entry in-flight and returns what to send.
    fn take_ready(&mut self, now: Instant) -> Option<(String, String, Value)> {
        let message = self.entries.values_mut().find(|m| m.is_ready(now))?;
        message.state = MessageState::InFlight;
        Some((
            message.id.clone(),
            message.kind.clone(),
            message.payload.clone(),
        ))
    }

    fn next_retry_at(&self, now: Instant) -> Option<Instant> {
        self.entries
            .values()
            .filter(|m| m.state == MessageState::Pending && !m.is_expired(now))
            .filter_map(|m| m.next_attempt_at)
            .min()
    }

    fn next_ready_at(&self, now: Instant) -> Option<Instant> {
        self.entries
            .values()
            .filter(|m| m.state == MessageState::Pending && !m.is_expired(now))
            .map(|m| m.next_attempt_at.map_or(now, |at| at.max(now)))
            .min()
    }
}

/// Resets the processing flag when a drain ends, even if it is cancelled.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Outbound message queue used while no channel is available or a send
/// fails.
///
/// Messages are ordered by priority, then age. Identical `(type, payload)`
/// pairs submitted within the dedup window collapse into one entry. The
/// queue never polls on its own; it is drained by whoever owns a channel.
#[derive(Debug)]
pub struct MessageQueue {
    config: QueueConfig,
    backoff: Backoff,
    clock: Arc<dyn Clock>,
    state: Mutex<QueueState>,
    processing: AtomicBool,
}

impl MessageQueue {
    /// Creates an empty queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: QueueConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            backoff: config.retry_backoff(),
            config,
            clock,
            state: Mutex::new(QueueState::default()),
            processing: AtomicBool::new(false),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Returns the clock.
    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Adds a message unless the same content was enqueued within the dedup
    /// window.
    ///
    /// At capacity the oldest entry of the lowest priority class present is
    /// evicted, provided it does not outrank the new message.
    pub async fn enqueue(
        &self,
        kind: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> EnqueueOutcome {
        let id = message_id(kind, &payload);
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        if let Some(first_seen) = state.seen.get(&id) {
            if now.saturating_duration_since(*first_seen) < self.config.dedup_window {
                debug!(message_id = %id, kind, "duplicate enqueue collapsed");
                return EnqueueOutcome::Deduplicated(id);
            }
        }

        let mut evicted = None;
        if state.entries.len() >= self.config.capacity {
            let candidate = state
                .eviction_candidate()
                .filter(|key| key.priority() <= options.priority);

            let Some(key) = candidate else {
                warn!(message_id = %id, kind, priority = %options.priority, "queue full, message rejected");
                return EnqueueOutcome::Rejected(id);
            };

            if let Some(victim) = state.entries.remove(&key) {
                state.keys.remove(&victim.id);
                state.seen.remove(&victim.id);
                debug!(
                    message_id = %victim.id,
                    priority = %victim.priority,
                    "queue full, evicted oldest lowest-priority message"
                );
                evicted = Some(victim.id);
            }
        }

        let key = OrderKey(Reverse(options.priority), now, state.next_seq);
        state.next_seq += 1;

        let message = QueuedMessage {
            id: id.clone(),
            kind: kind.to_string(),
            payload,
            priority: options.priority,
            enqueued_at: now,
            retry_count: 0,
            max_retries: options
                .max_retries
                .unwrap_or(self.config.default_max_retries),
            expires_at: options.expiry.and_then(|e| e.resolve(now)),
            next_attempt_at: None,
            state: MessageState::Pending,
        };

        state.entries.insert(key, message);
        state.keys.insert(id.clone(), key);
        state.seen.insert(id.clone(), now);

        match evicted {
            Some(evicted) => EnqueueOutcome::Evicted { id, evicted },
            None => EnqueueOutcome::Inserted(id),
        }
    }

    /// Delivers every ready message through `sink`.
    ///
    /// Only one drain runs at a time; a concurrent call returns a skipped
    /// report immediately. A failed message is rescheduled with capped
    /// exponential backoff and the pass continues with the others; once it
    /// has failed more than `max_retries` times it is dropped.
    pub async fn drain<S>(&self, sink: &S) -> DrainReport
    where
        S: FrameSink + ?Sized,
    {
        if self.processing.swap(true, Ordering::AcqRel) {
            return DrainReport::skipped();
        }
        let _guard = ProcessingGuard(&self.processing);

        let mut report = DrainReport::default();

        {
            let released = self.state.lock().await.release_in_flight();
            if released > 0 {
                warn!(released, "requeued messages left in flight by a cancelled drain");
            }
        }

        loop {
            let now = self.clock.now();
            let next = {
                let mut state = self.state.lock().await;
                report.expired += state.remove_expired(now);
                state.take_ready(now)
            };

            let Some((id, kind, payload)) = next else {
                break;
            };

            let result = sink.send_frame(&kind, &payload).await;

            let mut state = self.state.lock().await;
            match result {
                Ok(()) => {
                    state.remove(&id);
                    report.delivered += 1;
                }
                Err(e) => {
                    let Some(key) = state.keys.get(&id).copied() else {
                        continue;
                    };
                    let Some(message) = state.entries.get_mut(&key) else {
                        continue;
                    };

                    message.retry_count += 1;
                    if message.retry_count > message.max_retries {
                        warn!(
                            message_id = %id,
                            kind = %kind,
                            attempts = message.retry_count,
                            error = %e,
                            "dropping message after exhausting retries"
                        );
                        state.remove(&id);
                        report.dropped += 1;
                    } else {
                        let delay = self.backoff.delay(message.retry_count);
                        message.state = MessageState::Pending;
                        message.next_attempt_at = Some(self.clock.now() + delay);
                        debug!(
                            message_id = %id,
                            retry = message.retry_count,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            error = %e,
                            "delivery failed, retry scheduled"
                        );
                        report.retried += 1;
                    }
                }
            }
        }

        report.next_retry_at = self
            .state
            .lock()
            .await
            .next_retry_at(self.clock.now());
        report
    }

    /// Removes every message past its deadline, in flight or not, and
    /// forgets dedup records older than the window. Returns the number of
    /// messages removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let window = self.config.dedup_window;
        let mut state = self.state.lock().await;

        // A drain takes the state lock before marking anything in flight.
        if !self.processing.load(Ordering::Acquire) {
            state.release_in_flight();
        }

        let removed = state.remove_expired(now);
        state
            .seen
            .retain(|_, first_seen| now.saturating_duration_since(*first_seen) < window);

        if removed > 0 {
            debug!(removed, "expiry sweep");
        }
        removed
    }

    /// Earliest instant at which a pending message becomes deliverable.
    pub async fn next_ready_at(&self) -> Option<Instant> {
        let now = self.clock.now();
        self.state.lock().await.next_ready_at(now)
    }

    /// Returns the number of queued messages.
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Returns true if nothing is queued.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.entries.is_empty()
    }

    /// Returns true if a message with the id is queued.
    pub async fn contains(&self, id: &str) -> bool {
        self.state.lock().await.keys.contains_key(id)
    }

    /// Returns the queued messages in delivery order.
    pub async fn snapshot(&self) -> Vec<QueuedMessage> {
        self.state.lock().await.entries.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;
    use crate::clock::ManualClock;
    use crate::queue::message::Expiry;
    use crate::ws::error::WsError;

    /// Records frames; fails while `fail` is set.
    #[derive(Default)]
    struct RecordingSink {
        sent: StdMutex<Vec<(String, Value)>>,
        attempts: StdMutex<Vec<Instant>>,
        fail: AtomicBool,
        clock: Option<Arc<ManualClock>>,
    }

    impl RecordingSink {
        fn failing(clock: Arc<ManualClock>) -> Self {
            Self {
                fail: AtomicBool::new(true),
                clock: Some(clock),
                ..Self::default()
            }
        }

        fn kinds(&self) -> Vec<String> {
            self.sent
                .lock()
                .expect("lock")
                .iter()
                .map(|(k, _)| k.clone())
                .collect()
        }

        fn attempt_count(&self) -> usize {
            self.attempts.lock().expect("lock").len()
        }
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send_frame(&self, kind: &str, payload: &Value) -> Result<(), WsError> {
            if let Some(clock) = &self.clock {
                self.attempts.lock().expect("lock").push(clock.now());
            } else {
                self.attempts.lock().expect("lock").push(Instant::now());
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(WsError::SendFailed("socket closed".to_string()));
            }
            self.sent
                .lock()
                .expect("lock")
                .push((kind.to_string(), payload.clone()));
            Ok(())
        }
    }

    /// Never completes a send.
    struct HangingSink;

    #[async_trait]
    impl FrameSink for HangingSink {
        async fn send_frame(&self, _kind: &str, _payload: &Value) -> Result<(), WsError> {
            std::future::pending().await
        }
    }

    /// Holds every send until `open` is set and `release` is notified.
    #[derive(Default)]
    struct GatedSink {
        entered: Notify,
        release: Notify,
        open: AtomicBool,
        sent: StdMutex<Vec<String>>,
    }

    impl GatedSink {
        fn kinds(&self) -> Vec<String> {
            self.sent.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl FrameSink for GatedSink {
        async fn send_frame(&self, kind: &str, _payload: &Value) -> Result<(), WsError> {
            self.entered.notify_one();
            if !self.open.load(Ordering::SeqCst) {
                self.release.notified().await;
            }
            self.sent.lock().expect("lock").push(kind.to_string());
            Ok(())
        }
    }

    fn queue_with(config: QueueConfig) -> (MessageQueue, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let queue = MessageQueue::new(config, Arc::clone(&clock) as Arc<dyn Clock>).expect("queue");
        (queue, clock)
    }

    fn queue() -> (MessageQueue, Arc<ManualClock>) {
        queue_with(QueueConfig::default())
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_collapses() {
        let (queue, clock) = queue();
        let payload = json!({"notification_id": 1});

        let first = queue
            .enqueue("ack", payload.clone(), EnqueueOptions::default())
            .await;
        clock.advance(Duration::from_secs(60));
        let second = queue.enqueue("ack", payload, EnqueueOptions::default()).await;

        assert!(matches!(first, EnqueueOutcome::Inserted(_)));
        assert!(matches!(second, EnqueueOutcome::Deduplicated(_)));
        assert_eq!(first.id(), second.id());
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_enqueue_after_window_is_new() {
        let (queue, clock) = queue_with(
            QueueConfig::default().with_dedup_window(Duration::from_secs(10)),
        );
        let sink = RecordingSink::default();

        queue
            .enqueue("ECHO", json!("hi"), EnqueueOptions::default())
            .await;
        queue.drain(&sink).await;

        clock.advance(Duration::from_secs(5));
        let within = queue
            .enqueue("ECHO", json!("hi"), EnqueueOptions::default())
            .await;
        assert!(matches!(within, EnqueueOutcome::Deduplicated(_)));
        assert!(queue.is_empty().await);

        clock.advance(Duration::from_secs(6));
        let after = queue
            .enqueue("ECHO", json!("hi"), EnqueueOptions::default())
            .await;
        assert!(matches!(after, EnqueueOutcome::Inserted(_)));
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_critical_preempts_older_low() {
        let (queue, clock) = queue();
        let sink = RecordingSink::default();

        queue
            .enqueue(
                "low",
                json!(0),
                EnqueueOptions::with_priority(Priority::Low),
            )
            .await;
        clock.advance(Duration::from_secs(1));
        queue
            .enqueue(
                "critical",
                json!(1),
                EnqueueOptions::with_priority(Priority::Critical),
            )
            .await;

        let report = queue.drain(&sink).await;

        assert_eq!(report.delivered, 2);
        assert_eq!(sink.kinds(), vec!["critical", "low"]);
    }

    #[tokio::test]
    async fn test_fifo_within_priority() {
        let (queue, _clock) = queue();
        for n in 0..5 {
            queue
                .enqueue("ECHO", json!(n), EnqueueOptions::default())
                .await;
        }

        let order: Vec<Value> = queue
            .snapshot()
            .await
            .into_iter()
            .map(|m| m.payload)
            .collect();
        assert_eq!(order, vec![json!(0), json!(1), json!(2), json!(3), json!(4)]);
    }

    #[tokio::test]
    async fn test_always_failing_sink_retries_then_drops() {
        let (queue, clock) = queue();
        let sink = RecordingSink::failing(Arc::clone(&clock));

        queue
            .enqueue(
                "ECHO",
                json!({"n": 1}),
                EnqueueOptions::default().max_retries(3),
            )
            .await;

        let mut reports = Vec::new();
        for _ in 0..10 {
            let report = queue.drain(&sink).await;
            reports.push(report);
            match report.next_retry_at {
                Some(at) => clock.advance_to(at),
                None => break,
            }
        }

        // One initial attempt plus three retries.
        assert_eq!(sink.attempt_count(), 4);
        assert!(queue.is_empty().await);
        assert_eq!(reports.iter().map(|r| r.dropped).sum::<usize>(), 1);

        let attempts = sink.attempts.lock().expect("lock").clone();
        let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
            ]
        );
        assert!(gaps.windows(2).all(|w| w[0] < w[1]));

        // Never redelivered.
        clock.advance(Duration::from_secs(3600));
        sink.fail.store(false, Ordering::SeqCst);
        let report = queue.drain(&sink).await;
        assert_eq!(report.delivered, 0);
        assert_eq!(sink.attempt_count(), 4);
    }

    #[tokio::test]
    async fn test_retry_delay_is_capped() {
        let (queue, clock) = queue_with(
            QueueConfig::default()
                .with_retry_backoff(Duration::from_secs(1), Duration::from_secs(5)),
        );
        let sink = RecordingSink::failing(Arc::clone(&clock));

        queue
            .enqueue("ECHO", json!(1), EnqueueOptions::default().max_retries(6))
            .await;

        let mut delays = Vec::new();
        loop {
            let now = clock.now();
            let report = queue.drain(&sink).await;
            let Some(at) = report.next_retry_at else {
                break;
            };
            delays.push(at - now);
            clock.advance_to(at);
        }

        assert_eq!(
            delays,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(5),
                Duration::from_secs(5),
                Duration::from_secs(5),
                Duration::from_secs(5),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_message_does_not_block_others() {
        let (queue, clock) = queue();
        let failing = RecordingSink::failing(Arc::clone(&clock));

        queue
            .enqueue("first", json!(1), EnqueueOptions::default())
            .await;
        queue
            .enqueue("second", json!(2), EnqueueOptions::default())
            .await;

        let report = queue.drain(&failing).await;
        assert_eq!(report.retried, 2);
        assert_eq!(failing.attempt_count(), 2);

        // Nothing is ready before the retry time.
        let ok = RecordingSink::default();
        assert_eq!(queue.drain(&ok).await.delivered, 0);

        clock.advance(Duration::from_secs(2));
        assert_eq!(queue.drain(&ok).await.delivered, 2);
        assert_eq!(ok.kinds(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_expired_message_never_delivered() {
        let (queue, clock) = queue();
        let sink = RecordingSink::default();

        queue
            .enqueue(
                "ECHO",
                json!("stale"),
                EnqueueOptions::default().expires(Expiry::At(clock.now())),
            )
            .await;
        queue
            .enqueue(
                "ECHO",
                json!("soon"),
                EnqueueOptions::default().expires(Expiry::After(Duration::from_secs(10))),
            )
            .await;

        clock.advance(Duration::from_secs(11));
        let report = queue.drain(&sink).await;

        assert_eq!(report.delivered, 0);
        assert_eq!(report.expired, 2);
        assert!(sink.kinds().is_empty());
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_regardless_of_retry_state() {
        let (queue, clock) = queue();
        let failing = RecordingSink::failing(Arc::clone(&clock));

        queue
            .enqueue(
                "ECHO",
                json!(1),
                EnqueueOptions::default().expires(Expiry::After(Duration::from_secs(3))),
            )
            .await;
        queue
            .enqueue("ECHO", json!(2), EnqueueOptions::default())
            .await;

        queue.drain(&failing).await;
        clock.advance(Duration::from_secs(3));

        assert_eq!(queue.sweep_expired().await, 1);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_sweep_forgets_old_dedup_records() {
        let (queue, clock) = queue_with(
            QueueConfig::default().with_dedup_window(Duration::from_secs(10)),
        );
        let sink = RecordingSink::default();

        queue.enqueue("ECHO", json!(1), EnqueueOptions::default()).await;
        queue.drain(&sink).await;

        clock.advance(Duration::from_secs(10));
        queue.sweep_expired().await;

        let again = queue.enqueue("ECHO", json!(1), EnqueueOptions::default()).await;
        assert!(matches!(again, EnqueueOutcome::Inserted(_)));
    }

    #[tokio::test]
    async fn test_capacity_evicts_low_priority_first() {
        let (queue, clock) = queue();

        for n in 0..999 {
            queue
                .enqueue("ECHO", json!(n), EnqueueOptions::default())
                .await;
        }
        clock.advance(Duration::from_secs(1));
        let low = queue
            .enqueue(
                "ECHO",
                json!("low"),
                EnqueueOptions::with_priority(Priority::Low),
            )
            .await;
        assert_eq!(queue.len().await, 1000);

        let outcome = queue
            .enqueue("ECHO", json!("new"), EnqueueOptions::default())
            .await;

        match &outcome {
            EnqueueOutcome::Evicted { evicted, .. } => assert_eq!(evicted, low.id()),
            other => panic!("Expected eviction, got {other:?}"),
        }
        assert_eq!(queue.len().await, 1000);
        assert!(queue.contains(outcome.id()).await);
        assert!(!queue.contains(low.id()).await);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest_of_lowest_class() {
        let (queue, clock) = queue_with(QueueConfig::default().with_capacity(3));

        let oldest = queue
            .enqueue("ECHO", json!(1), EnqueueOptions::default())
            .await;
        clock.advance(Duration::from_millis(1));
        queue.enqueue("ECHO", json!(2), EnqueueOptions::default()).await;
        queue
            .enqueue(
                "ECHO",
                json!(3),
                EnqueueOptions::with_priority(Priority::High),
            )
            .await;

        let outcome = queue.enqueue("ECHO", json!(4), EnqueueOptions::default()).await;
        assert_eq!(
            outcome,
            EnqueueOutcome::Evicted {
                id: outcome.id().to_string(),
                evicted: oldest.id().to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_capacity_rejects_when_everything_outranks() {
        let (queue, _clock) = queue_with(QueueConfig::default().with_capacity(2));

        for n in 0..2 {
            queue
                .enqueue(
                    "ECHO",
                    json!(n),
                    EnqueueOptions::with_priority(Priority::High),
                )
                .await;
        }

        let outcome = queue
            .enqueue(
                "ECHO",
                json!("low"),
                EnqueueOptions::with_priority(Priority::Low),
            )
            .await;

        assert!(matches!(outcome, EnqueueOutcome::Rejected(_)));
        assert!(!outcome.is_queued());
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_drain_is_skipped() {
        let (queue, _clock) = queue();
        let queue = Arc::new(queue);
        let sink = Arc::new(GatedSink::default());

        queue.enqueue("first", json!(1), EnqueueOptions::default()).await;
        queue.enqueue("second", json!(2), EnqueueOptions::default()).await;

        let running = {
            let queue = Arc::clone(&queue);
            let sink = Arc::clone(&sink);
            tokio::spawn(async move { queue.drain(sink.as_ref()).await })
        };
        sink.entered.notified().await;

        let second = queue.drain(sink.as_ref()).await;
        assert!(second.skipped);
        assert_eq!(second.delivered, 0);

        sink.open.store(true, Ordering::SeqCst);
        sink.release.notify_one();

        let first = running.await.expect("join");
        assert!(!first.skipped);
        assert_eq!(first.delivered, 2);
        assert_eq!(sink.kinds(), vec!["first", "second"]);

        assert_eq!(queue.drain(sink.as_ref()).await.delivered, 0);
        assert_eq!(sink.kinds().len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_drain_requeues_message() {
        let (queue, _clock) = queue();
        queue
            .enqueue(
                "ECHO",
                json!(1),
                EnqueueOptions::default().expires(Expiry::After(Duration::from_secs(5))),
            )
            .await;

        let cancelled =
            tokio::time::timeout(Duration::from_millis(50), queue.drain(&HangingSink)).await;
        assert!(cancelled.is_err());

        let sink = RecordingSink::default();
        let report = queue.drain(&sink).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(sink.kinds(), vec!["ECHO"]);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_message_left_by_cancelled_drain() {
        let (queue, clock) = queue();
        queue
            .enqueue(
                "ECHO",
                json!(1),
                EnqueueOptions::default().expires(Expiry::After(Duration::from_secs(5))),
            )
            .await;

        let cancelled =
            tokio::time::timeout(Duration::from_millis(50), queue.drain(&HangingSink)).await;
        assert!(cancelled.is_err());

        clock.advance(Duration::from_secs(10));
        assert_eq!(queue.sweep_expired().await, 1);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_enqueue_with_unbounded_ttl_never_expires() {
        let (queue, clock) = queue();
        let outcome = queue
            .enqueue(
                "ECHO",
                json!(1),
                EnqueueOptions::default().expires(Expiry::After(Duration::MAX)),
            )
            .await;
        assert!(outcome.is_queued());

        clock.advance(Duration::from_secs(86_400));
        assert_eq!(queue.sweep_expired().await, 0);
        assert_eq!(queue.snapshot().await[0].expires_at, None);
    }

    #[tokio::test]
    async fn test_next_ready_at() {
        let (queue, clock) = queue();
        assert_eq!(queue.next_ready_at().await, None);

        queue.enqueue("ECHO", json!(1), EnqueueOptions::default()).await;
        assert_eq!(queue.next_ready_at().await, Some(clock.now()));

        queue
            .drain(&RecordingSink::failing(Arc::clone(&clock)))
            .await;
        assert_eq!(
            queue.next_ready_at().await,
            Some(clock.now() + Duration::from_secs(2))
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        assert!(MessageQueue::new(QueueConfig::default().with_capacity(0), clock).is_err());
    }
}
