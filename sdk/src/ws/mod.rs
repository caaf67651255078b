//! WebSocket client for real-time staff notifications.
//!
//! [`NotifyClient`] keeps a socket to the notification server open,
//! reconnecting with capped exponential backoff. Outbound frames go through
//! a [`Dispatcher`] that writes to the socket when it is open and defers to
//! the priority queue otherwise.
//!
//! # Example
//!
//! ```rust,ignore
//! use gatepost_sdk::ws::{ClientEvent, NotifyClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = NotifyClient::with_url("wss://notify.example/ws", "<jwt>")?;
//!     client.connect().await?;
//!
//!     loop {
//!         match client.next_event().await? {
//!             ClientEvent::Notification(n) => {
//!                 println!("{}: {}", n.title, n.message);
//!                 client.acknowledge(n.notification_id).await;
//!             }
//!             ClientEvent::Connected { reconnected: true } => {
//!                 // re-fetch missed notifications over HTTP
//!             }
//!             _ => {}
//!         }
//!     }
//! }
//! ```

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod messages;
pub mod state;

pub use client::{ClientEvent, NotifyClient};
pub use config::WsConfig;
pub use dispatcher::{Dispatcher, SendOutcome};
pub use error::WsError;
pub use messages::{Notification, NotificationCount, ServerMessage, SessionInfo};
pub use state::{CloseCause, ConnectionState, ConnectionStateMachine, ReconnectDecision};
