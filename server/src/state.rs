//! Shared application state.

use std::sync::Arc;

use crate::auth::TokenValidator;
use crate::config::{ConfigError, ServerConfig};
use crate::ws::{BroadcastRouter, ConnectionRegistry, WsMetrics};

/// State shared by every request handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Open connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Fan-out entry point for collaborators.
    pub router: BroadcastRouter,
    /// Metrics.
    pub metrics: Arc<WsMetrics>,
    /// Handshake credential validator.
    pub validator: Arc<TokenValidator>,
}

impl AppState {
    /// Builds the state for a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: ServerConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let metrics = Arc::new(WsMetrics::new());
        let registry = Arc::new(ConnectionRegistry::new(Arc::clone(&metrics)));
        let router = BroadcastRouter::new(Arc::clone(&registry));
        let validator = Arc::new(TokenValidator::new(config.jwt_secret.as_bytes()));

        Ok(Self {
            config: Arc::new(config),
            registry,
            router,
            metrics,
            validator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_requires_valid_config() {
        assert_eq!(
            AppState::new(ServerConfig::default()).map(|_| ()),
            Err(ConfigError::MissingSecret)
        );
    }

    #[tokio::test]
    async fn test_state_shares_metrics() {
        let state = AppState::new(ServerConfig::default().with_jwt_secret("s")).expect("state");
        state.metrics.record_eviction();
        assert_eq!(state.registry.metrics().evictions(), 1);
        assert_eq!(state.registry.connection_count().await, 0);
    }
}
