//! Gatepost SDK - client library for real-time staff notifications.
//!
//! This crate provides the client half of the notification system: a
//! reconnecting WebSocket client, the outbound priority queue that carries
//! frames across disconnects, and an HTTP client for the durable
//! notification endpoints.
//!
//! # Modules
//!
//! - [`ws`] - [`NotifyClient`], [`Dispatcher`] and the connection state machine
//! - [`queue`] - [`MessageQueue`] with dedup, priority ordering, retry and expiry
//! - [`client`] - [`NotificationsClient`] for re-fetching after missed delivery
//! - [`clock`] / [`backoff`] - injectable time and the shared delay policy
//!
//! # Example
//!
//! ```rust
//! use gatepost_sdk::queue::{message_id, Priority};
//! use serde_json::json;
//!
//! let a = message_id("ack", &json!({"notification_id": 7}));
//! let b = message_id("ack", &json!({"notification_id": 7}));
//! assert_eq!(a, b);
//! assert!(Priority::Critical > Priority::Low);
//! ```

pub mod backoff;
pub mod client;
pub mod clock;
pub mod queue;
pub mod transport;
pub mod ws;

pub use backoff::Backoff;
pub use client::{ClientConfig, ClientError, NotificationsClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use queue::{
    message_id, DrainReport, EnqueueOptions, EnqueueOutcome, Expiry, MessageQueue, Priority,
    QueueConfig,
};
pub use transport::FrameSink;
pub use ws::{
    ClientEvent, ConnectionState, Dispatcher, Notification, NotificationCount, NotifyClient,
    SendOutcome, WsConfig, WsError,
};
