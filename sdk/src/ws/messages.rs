//! WebSocket message types.
//!
//! Defines the message types for WebSocket communication. Every frame is a
//! JSON text frame `{"type": ..., "data": ...}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::error::WsError;
use crate::queue::Priority;

/// Frame type of an application ping.
pub const PING: &str = "ping";

/// Frame type of the diagnostic loopback.
pub const ECHO: &str = "ECHO";

/// Frame type of a notification acknowledgement.
pub const ACK: &str = "ack";

/// Session details sent by the server after the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Server-assigned connection id.
    pub connection_id: u64,
    /// Authenticated user id.
    pub user_id: String,
    /// Role.
    pub role: String,
    /// Scope key.
    pub scope_key: String,
}

/// A notification delivered in real time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification id.
    pub notification_id: i64,
    /// Notification type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Category.
    pub category: String,
    /// Title.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Read flag.
    pub is_read: bool,
    /// Priority.
    #[serde(default)]
    pub priority: Priority,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Read time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    /// Human readable scope name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_name: Option<String>,
}

/// Notification counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationCount {
    /// All notifications.
    pub total: u64,
    /// Unread notifications.
    pub unread: u64,
}

/// Server-to-client messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake accepted.
    Authenticated(SessionInfo),
    /// A new notification.
    Notification(Notification),
    /// Updated counters.
    NotificationCount(NotificationCount),
    /// Reply to a `ping`.
    Pong,
    /// Loopback of an `ECHO` frame.
    #[serde(rename = "ECHO")]
    Echo(Value),
    /// Error reported by the server.
    Error {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
    },
}

impl ServerMessage {
    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a known server message.
    pub fn parse(text: &str) -> Result<Self, WsError> {
        serde_json::from_str(text).map_err(|e| WsError::Deserialization(e.to_string()))
    }
}

/// Encodes an outbound frame. `data` is omitted when the payload is null.
#[must_use]
pub fn encode_frame(kind: &str, payload: &Value) -> String {
    let mut frame = Map::new();
    frame.insert("type".to_string(), Value::String(kind.to_string()));
    if !payload.is_null() {
        frame.insert("data".to_string(), payload.clone());
    }
    Value::Object(frame).to_string()
}

/// Payload of an application ping.
#[must_use]
pub fn ping_payload(timestamp: DateTime<Utc>) -> Value {
    json!({ "timestamp": timestamp.timestamp_millis() })
}

/// Payload of an acknowledgement.
#[must_use]
pub fn ack_payload(notification_id: i64) -> Value {
    json!({ "notification_id": notification_id })
}
