//! HTTP client for the notifications endpoints of the business layer.
//!
//! Real-time delivery is best-effort. After a reconnect the application
//! re-fetches the durable list and unread count with this client.
//!
//! # Example
//!
//! ```rust,ignore
//! use gatepost_sdk::client::{ClientConfig, NotificationQuery, NotificationsClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("https://api.example/api").with_access_token("<jwt>");
//!     let client = NotificationsClient::new(config)?;
//!
//!     let page = client.list_notifications(&NotificationQuery::unread()).await?;
//!     println!("{} unread", page.total);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod http;

pub use config::ClientConfig;
pub use error::ClientError;
pub use http::{NotificationPage, NotificationQuery, NotificationsClient};
