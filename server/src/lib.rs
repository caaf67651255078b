//! Gatepost notification server.
//!
//! Delivers real-time staff notifications over authenticated WebSocket
//! connections. The business layer publishes through
//! [`BroadcastRouter`](ws::BroadcastRouter) in process, or posts
//! [`CollaboratorEvent`](notification::CollaboratorEvent)s to
//! `/internal/events`.
//!
//! # Example
//!
//! ```rust,no_run
//! use gatepost_server::{Server, ServerConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::new("127.0.0.1", 8080).with_jwt_secret("secret");
//! Server::new(config)?.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod notification;
pub mod server;
pub mod state;
pub mod ws;

pub use auth::{AuthError, Claims, Identity, TokenValidator};
pub use config::{ConfigError, ServerConfig};
pub use notification::{
    Audience, CollaboratorEvent, NotificationCount, NotificationPayload, NotificationPriority,
    OutboundNotification,
};
pub use server::{build_router, Server};
pub use state::AppState;
