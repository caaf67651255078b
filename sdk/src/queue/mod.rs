//! Outbound message queue.
//!
//! Holds frames that could not be sent immediately, orders them by priority,
//! collapses duplicates and retries failed deliveries with backoff.

pub mod config;
pub mod message;
pub mod priority_queue;

pub use config::{ConfigError, QueueConfig};
pub use message::{
    message_id, EnqueueOptions, EnqueueOutcome, Expiry, MessageState, Priority, QueuedMessage,
};
pub use priority_queue::{DrainReport, MessageQueue};
