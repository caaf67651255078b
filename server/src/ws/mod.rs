//! WebSocket module for real-time staff notifications.
//!
//! Provides the authenticated connection registry, the liveness sweep and
//! the broadcast router, plus the upgrade handler that ties them to axum.
//!
//! # Message Types
//!
//! - `authenticated` - Sent once after a successful handshake
//! - `notification` / `notification_count` - Pushed by the router
//! - `ping` / `pong` / `ECHO` - Keepalive and diagnostics
//! - `ack` - Client acknowledgement of a notification
//! - `error` - Error responses

pub mod connection;
pub mod handler;
pub mod liveness;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod router;

pub use connection::{close_code, Connection, ConnectionId, ConnectionInfo, Outbound};
pub use handler::{ws_handler, WsAuthQuery};
pub use liveness::{LivenessMonitor, SweepReport};
pub use messages::{ClientMessage, ProtocolError, ServerMessage, SessionInfo};
pub use metrics::{WsMetrics, WsMetricsSnapshot};
pub use registry::{ConnectionRegistry, EvictReason};
pub use router::{BroadcastReport, BroadcastRouter};
