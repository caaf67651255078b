//! Queued message types and content-derived ids.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Bytes of the SHA-256 digest kept in a message id.
const ID_BYTES: usize = 16;

/// Delivery priority. Declaration order is rank order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background traffic.
    Low,
    /// Regular traffic.
    #[default]
    Normal,
    /// Time-sensitive traffic.
    High,
    /// Must go out before anything else.
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Derives the id of a `(type, payload)` pair.
///
/// SHA-256 over the type, a zero byte and the payload serialized with
/// sorted object keys, truncated to 16 bytes and base58 encoded. Equal
/// pairs always map to the same id regardless of key order.
#[must_use]
pub fn message_id(kind: &str, payload: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical(payload).to_string().as_bytes());
    let digest = hasher.finalize();

    bs58::encode(&digest[..ID_BYTES]).into_string()
}

/// Rebuilds a value with object keys inserted in sorted order.
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let sorted: Map<String, Value> = entries
                .into_iter()
                .map(|(k, v)| (k.clone(), canonical(v)))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

/// When a message stops being worth delivering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// At a fixed instant.
    At(Instant),
    /// A duration after enqueue.
    After(Duration),
}

impl Expiry {
    /// Resolves the expiry relative to `now`.
    ///
    /// A TTL too large to represent as an instant means the message never
    /// expires.
    #[must_use]
    pub fn resolve(self, now: Instant) -> Option<Instant> {
        match self {
            Self::At(at) => Some(at),
            Self::After(ttl) => now.checked_add(ttl),
        }
    }
}

/// Per-message enqueue options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Priority.
    pub priority: Priority,
    /// Retry budget; the queue default applies when unset.
    pub max_retries: Option<u32>,
    /// Optional expiry.
    pub expiry: Option<Expiry>,
}

impl EnqueueOptions {
    /// Options with the given priority and queue defaults otherwise.
    #[must_use]
    pub fn with_priority(priority: Priority) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }

    /// Sets the retry budget.
    #[must_use]
    pub const fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Sets the expiry.
    #[must_use]
    pub const fn expires(mut self, expiry: Expiry) -> Self {
        self.expiry = Some(expiry);
        self
    }
}

/// Lifecycle state of a queued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    /// Waiting for a delivery attempt.
    Pending,
    /// Handed to the sender; not eligible for another attempt or eviction.
    InFlight,
}

/// A message waiting for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    /// Content-derived id.
    pub id: String,
    /// Frame type.
    pub kind: String,
    /// Frame data.
    pub payload: Value,
    /// Priority.
    pub priority: Priority,
    /// Enqueue time.
    pub enqueued_at: Instant,
    /// Failed delivery attempts so far.
    pub retry_count: u32,
    /// Failed attempts tolerated before the message is dropped.
    pub max_retries: u32,
    /// Deadline after which the message is never delivered.
    pub expires_at: Option<Instant>,
    /// Earliest time of the next attempt after a failure.
    pub next_attempt_at: Option<Instant>,
    /// Lifecycle state.
    pub state: MessageState,
}

impl QueuedMessage {
    /// Returns true if the message is past its deadline.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Returns true if the message may be attempted now.
    #[must_use]
    pub fn is_ready(&self, now: Instant) -> bool {
        self.state == MessageState::Pending
            && !self.is_expired(now)
            && self.next_attempt_at.map_or(true, |at| at <= now)
    }
}

/// Result of an enqueue call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Inserted as a new entry.
    Inserted(String),
    /// The same content was enqueued within the dedup window.
    Deduplicated(String),
    /// Inserted after evicting a lower or equal priority entry.
    Evicted {
        /// Id of the new entry.
        id: String,
        /// Id of the evicted entry.
        evicted: String,
    },
    /// Rejected because the queue is full of higher priority entries.
    Rejected(String),
}

impl EnqueueOutcome {
    /// Returns the id of the submitted message.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Inserted(id)
            | Self::Deduplicated(id)
            | Self::Evicted { id, .. }
            | Self::Rejected(id) => id,
        }
    }

    /// Returns true if the message is (or already was) in the queue.
    #[must_use]
    pub const fn is_queued(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}
