//! WebSocket message types.
//!
//! Every frame is a JSON text frame of the form `{"type": ..., "data": ...}`;
//! `data` is omitted for bare control frames such as `pong`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::Identity;
use crate::notification::{NotificationCount, NotificationPayload};

/// Body of the `authenticated` frame sent after a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Server-assigned connection id.
    pub connection_id: u64,
    /// Authenticated identity.
    #[serde(flatten)]
    pub identity: Identity,
}

/// Message sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake accepted.
    Authenticated(SessionInfo),

    /// A new notification.
    Notification(NotificationPayload),

    /// Updated notification counters.
    NotificationCount(NotificationCount),

    /// Reply to a client `ping`.
    Pong,

    /// Diagnostic loopback of a client `ECHO` frame.
    #[serde(rename = "ECHO")]
    Echo(Value),

    /// Error response.
    Error {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
    },
}

impl ServerMessage {
    /// Creates an authenticated message.
    #[must_use]
    pub fn authenticated(connection_id: u64, identity: Identity) -> Self {
        Self::Authenticated(SessionInfo {
            connection_id,
            identity,
        })
    }

    /// Creates a notification message.
    #[must_use]
    pub fn notification(payload: NotificationPayload) -> Self {
        Self::Notification(payload)
    }

    /// Creates a notification count message.
    #[must_use]
    pub const fn notification_count(total: u64, unread: u64) -> Self {
        Self::NotificationCount(NotificationCount { total, unread })
    }

    /// Creates a pong message.
    #[must_use]
    pub const fn pong() -> Self {
        Self::Pong
    }

    /// Creates an echo message.
    #[must_use]
    pub fn echo(data: Value) -> Self {
        Self::Echo(data)
    }

    /// Creates an error message.
    #[must_use]
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Returns the wire `type` of this message.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Authenticated(_) => "authenticated",
            Self::Notification(_) => "notification",
            Self::NotificationCount(_) => "notification_count",
            Self::Pong => "pong",
            Self::Echo(_) => "ECHO",
            Self::Error { .. } => "error",
        }
    }
}

/// Message sent from client to server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Application level keepalive.
    Ping,

    /// Reply to an application level ping.
    Pong,

    /// Diagnostic loopback; echoed back verbatim.
    Echo(Value),

    /// Client acknowledged a notification.
    Ack {
        /// Acknowledged notification id.
        notification_id: i64,
    },
}

/// Raw `{type, data}` envelope.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct AckData {
    notification_id: i64,
}

impl ClientMessage {
    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not JSON, has an unknown type, or
    /// its `data` does not match the type.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

        match envelope.kind.as_str() {
            "ping" => Ok(Self::Ping),
            "pong" => Ok(Self::Pong),
            "ECHO" => Ok(Self::Echo(envelope.data)),
            "ack" => {
                let ack: AckData = serde_json::from_value(envelope.data).map_err(|e| {
                    ProtocolError::InvalidData {
                        kind: "ack",
                        reason: e.to_string(),
                    }
                })?;
                Ok(Self::Ack {
                    notification_id: ack.notification_id,
                })
            }
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

/// Malformed client frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Frame is not a JSON envelope.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// Frame type is not understood.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// Frame data does not match its type.
    #[error("invalid {kind} data: {reason}")]
    InvalidData {
        /// Frame type.
        kind: &'static str,
        /// Decoder message.
        reason: String,
    },

    /// Binary frames are not part of the protocol.
    #[error("binary frames are not supported")]
    BinaryFrame,
}
