//! Server configuration.
//!
//! Provides configuration options for the notification server.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default bind host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default bind port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default liveness sweep interval in seconds.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 30;

/// Default per-connection outbound buffer, in frames.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 100;

/// Configuration for the notification server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,

    /// Bind port.
    pub port: u16,

    /// Shared secret used to verify handshake credentials.
    #[serde(default, skip_serializing)]
    pub jwt_secret: String,

    /// Liveness sweep interval in seconds.
    pub heartbeat_interval_secs: u64,

    /// Frames buffered per connection before a send counts as failed.
    pub outbound_buffer: usize,

    /// Bearer token accepted on the collaborator ingest endpoint. The
    /// endpoint is not mounted when unset.
    #[serde(default, skip_serializing)]
    pub ingest_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            jwt_secret: String::new(),
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_SECS,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            ingest_token: None,
        }
    }
}

impl ServerConfig {
    /// Creates a new configuration bound to the given host and port.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Sets the credential secret.
    #[must_use]
    pub fn with_jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.jwt_secret = secret.into();
        self
    }

    /// Sets the liveness sweep interval.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, secs: u64) -> Self {
        self.heartbeat_interval_secs = secs;
        self
    }

    /// Sets the per-connection outbound buffer.
    #[must_use]
    pub fn with_outbound_buffer(mut self, frames: usize) -> Self {
        self.outbound_buffer = frames;
        self
    }

    /// Enables the collaborator ingest endpoint.
    #[must_use]
    pub fn with_ingest_token(mut self, token: impl Into<String>) -> Self {
        self.ingest_token = Some(token.into());
        self
    }

    /// Returns the liveness sweep interval.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Returns the `host:port` bind address.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Loads the configuration from `GATEPOST_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or the result is
    /// invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through a variable lookup function.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or the result is
    /// invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            host: lookup("GATEPOST_HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "GATEPOST_PORT", defaults.port)?,
            jwt_secret: lookup("GATEPOST_JWT_SECRET").unwrap_or_default(),
            heartbeat_interval_secs: parse_var(
                &lookup,
                "GATEPOST_HEARTBEAT_SECS",
                defaults.heartbeat_interval_secs,
            )?,
            outbound_buffer: parse_var(
                &lookup,
                "GATEPOST_OUTBOUND_BUFFER",
                defaults.outbound_buffer,
            )?,
            ingest_token: lookup("GATEPOST_INGEST_TOKEN"),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }

        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::InvalidHeartbeat);
        }

        if self.outbound_buffer == 0 {
            return Err(ConfigError::InvalidOutboundBuffer);
        }

        if matches!(&self.ingest_token, Some(token) if token.trim().is_empty()) {
            return Err(ConfigError::EmptyIngestToken);
        }

        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidVariable {
            key,
            value: raw,
        }),
        None => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// No credential secret configured.
    #[error("jwt_secret must be set")]
    MissingSecret,

    /// Invalid heartbeat interval.
    #[error("heartbeat_interval_secs must be > 0")]
    InvalidHeartbeat,

    /// Invalid outbound buffer.
    #[error("outbound_buffer must be > 0")]
    InvalidOutboundBuffer,

    /// Ingest token configured but blank.
    #[error("ingest_token must not be blank")]
    EmptyIngestToken,

    /// An environment variable could not be parsed.
    #[error("invalid value for {key}: {value}")]
    InvalidVariable {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
    },
}
