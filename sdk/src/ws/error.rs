//! WebSocket error types.

use std::fmt;

/// WebSocket errors.
#[derive(Debug)]
pub enum WsError {
    /// Connection failed.
    Connection(String),

    /// WebSocket protocol error.
    Protocol(String),

    /// Failed to deserialize message.
    Deserialization(String),

    /// Not connected.
    NotConnected,

    /// Connection closed.
    Closed,

    /// Invalid configuration.
    InvalidConfig(String),

    /// Send failed.
    SendFailed(String),
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(msg) => write!(f, "connection failed: {}", msg),
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Self::Deserialization(msg) => write!(f, "deserialization failed: {}", msg),
            Self::NotConnected => write!(f, "not connected"),
            Self::Closed => write!(f, "connection closed"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            Self::SendFailed(msg) => write!(f, "send failed: {}", msg),
        }
    }
}

impl std::error::Error for WsError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_error_display() {
        let err = WsError::Connection("timeout".to_string());
        assert_eq!(err.to_string(), "connection failed: timeout");
    }

    #[test]
    fn test_ws_error_send_failed() {
        let err = WsError::SendFailed("socket closed".to_string());
        assert_eq!(err.to_string(), "send failed: socket closed");
    }

    #[test]
    fn test_ws_error_not_connected() {
        let err = WsError::NotConnected;
        assert_eq!(err.to_string(), "not connected");
    }

    #[test]
    fn test_ws_error_closed() {
        let err = WsError::Closed;
        assert_eq!(err.to_string(), "connection closed");
    }
}
