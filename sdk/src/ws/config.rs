//! WebSocket configuration.
//!
//! Provides configuration options for the notification client.

use std::time::Duration;

use super::error::WsError;
use crate::backoff::Backoff;
use crate::queue::QueueConfig;

/// Default WebSocket URL.
pub const DEFAULT_WS_URL: &str = "ws://localhost:8080/ws";

/// Default heartbeat interval in seconds.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 30;

/// Default reconnect delay in seconds.
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 1;

/// Maximum reconnect delay in seconds.
pub const MAX_RECONNECT_DELAY_SECS: u64 = 30;

/// Default maximum consecutive reconnect attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// WebSocket configuration.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// WebSocket URL.
    pub url: String,

    /// Access token presented during the handshake.
    pub token: Option<String>,

    /// Heartbeat interval.
    pub heartbeat_interval: Duration,

    /// Initial reconnect delay.
    pub reconnect_delay: Duration,

    /// Maximum reconnect delay.
    pub max_reconnect_delay: Duration,

    /// Maximum consecutive reconnection attempts (None = unlimited).
    pub max_reconnect_attempts: Option<u32>,

    /// Outbound queue configuration.
    pub queue: QueueConfig,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            token: None,
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            reconnect_delay: Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECS),
            max_reconnect_delay: Duration::from_secs(MAX_RECONNECT_DELAY_SECS),
            max_reconnect_attempts: Some(DEFAULT_MAX_RECONNECT_ATTEMPTS),
            queue: QueueConfig::default(),
        }
    }
}

impl WsConfig {
    /// Creates a new configuration with the given URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Sets the access token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the heartbeat interval.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the initial reconnect delay.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the maximum reconnect delay.
    #[must_use]
    pub fn with_max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.max_reconnect_delay = delay;
        self
    }

    /// Sets the maximum reconnection attempts.
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    /// Retries forever.
    #[must_use]
    pub fn with_unlimited_reconnects(mut self) -> Self {
        self.max_reconnect_attempts = None;
        self
    }

    /// Sets the outbound queue configuration.
    #[must_use]
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Returns the reconnect delay policy.
    #[must_use]
    pub const fn reconnect_backoff(&self) -> Backoff {
        Backoff::new(self.reconnect_delay, self.max_reconnect_delay)
    }

    /// Returns the connection URL with the token if set.
    #[must_use]
    pub fn connection_url(&self) -> String {
        match &self.token {
            Some(token) => {
                if self.url.contains('?') {
                    format!("{}&token={}", self.url, token)
                } else {
                    format!("{}?token={}", self.url, token)
                }
            }
            None => self.url.clone(),
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), WsError> {
        if self.url.is_empty() {
            return Err(WsError::InvalidConfig("url cannot be empty".to_string()));
        }

        if !self.url.starts_with("ws://") && !self.url.starts_with("wss://") {
            return Err(WsError::InvalidConfig(
                "url must start with ws:// or wss://".to_string(),
            ));
        }

        if self.heartbeat_interval.is_zero() {
            return Err(WsError::InvalidConfig(
                "heartbeat_interval must be > 0".to_string(),
            ));
        }

        if self.reconnect_delay.is_zero() || self.max_reconnect_delay < self.reconnect_delay {
            return Err(WsError::InvalidConfig(
                "reconnect delays must satisfy 0 < reconnect_delay <= max_reconnect_delay"
                    .to_string(),
            ));
        }

        self.queue
            .validate()
            .map_err(|e| WsError::InvalidConfig(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = WsConfig::default();
        assert_eq!(config.url, DEFAULT_WS_URL);
        assert_eq!(
            config.heartbeat_interval,
            Duration::from_secs(DEFAULT_HEARTBEAT_SECS)
        );
        assert_eq!(config.max_reconnect_attempts, Some(10));
        assert!(config.token.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = WsConfig::new("wss://example.com/ws")
            .with_heartbeat_interval(Duration::from_secs(60))
            .with_reconnect_delay(Duration::from_secs(2))
            .with_max_reconnect_delay(Duration::from_secs(60))
            .with_token("jwt")
            .with_max_reconnect_attempts(5);

        assert_eq!(config.url, "wss://example.com/ws");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(60));
        assert_eq!(config.reconnect_delay, Duration::from_secs(2));
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(60));
        assert_eq!(config.token, Some("jwt".to_string()));
        assert_eq!(config.max_reconnect_attempts, Some(5));
        assert_eq!(config.with_unlimited_reconnects().max_reconnect_attempts, None);
    }

    #[test]
    fn test_reconnect_backoff() {
        let backoff = WsConfig::default().reconnect_backoff();
        assert_eq!(backoff.delay(0), Duration::from_secs(1));
        assert_eq!(backoff.delay(3), Duration::from_secs(8));
        assert_eq!(backoff.delay(5), Duration::from_secs(30));
    }

    #[test]
    fn test_config_connection_url_no_token() {
        let config = WsConfig::new("wss://example.com/ws");
        assert_eq!(config.connection_url(), "wss://example.com/ws");
    }

    #[test]
    fn test_config_connection_url_with_token() {
        let config = WsConfig::new("wss://example.com/ws").with_token("abc.def.ghi");
        assert_eq!(
            config.connection_url(),
            "wss://example.com/ws?token=abc.def.ghi"
        );
    }

    #[test]
    fn test_config_connection_url_with_existing_params() {
        let config = WsConfig::new("wss://example.com/ws?foo=bar").with_token("t");
        assert_eq!(config.connection_url(), "wss://example.com/ws?foo=bar&token=t");
    }

    #[test]
    fn test_config_validate() {
        assert!(WsConfig::new("wss://example.com/ws").validate().is_ok());
        assert!(WsConfig::new("").validate().is_err());
        assert!(WsConfig::new("https://example.com/ws").validate().is_err());
        assert!(WsConfig::default()
            .with_heartbeat_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(WsConfig::default()
            .with_reconnect_delay(Duration::from_secs(60))
            .validate()
            .is_err());
        assert!(WsConfig::default()
            .with_queue(QueueConfig::default().with_capacity(0))
            .validate()
            .is_err());
    }
}
