//! HTTP server wiring.

use std::future::Future;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api;
use crate::config::{ConfigError, ServerConfig};
use crate::state::AppState;
use crate::ws::{ws_handler, LivenessMonitor};

/// Builds the axum router for the given state.
///
/// `/internal/events` is only mounted when an ingest token is configured.
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(api::health));

    if state.config.ingest_token.is_some() {
        router = router.route("/internal/events", post(api::ingest));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// The notification server.
#[derive(Debug)]
pub struct Server {
    state: AppState,
}

impl Server {
    /// Creates a server from a configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: ServerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            state: AppState::new(config)?,
        })
    }

    /// Returns the shared state, e.g. to publish through its router.
    #[must_use]
    pub const fn state(&self) -> &AppState {
        &self.state
    }

    /// Returns the axum router.
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Binds the configured address and serves until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns an error if binding or serving fails.
    pub async fn run(self) -> std::io::Result<()> {
        let addr = self.state.config.bind_address();
        let listener = TcpListener::bind(&addr).await?;
        info!("Listening on {}", addr);

        self.serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
    }

    /// Serves on an already bound listener until `shutdown` resolves.
    ///
    /// The liveness monitor runs for the lifetime of the server.
    ///
    /// # Errors
    ///
    /// Returns an error if serving fails.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);

        let monitor = LivenessMonitor::new(
            Arc::clone(&self.state.registry),
            self.state.config.heartbeat_interval(),
        );
        let liveness = tokio::spawn(monitor.run(stop_rx));

        let app = self.router();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                let _ = stop_tx.send(true);
            })
            .await;

        let _ = liveness.await;
        info!("Server stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    fn config() -> ServerConfig {
        ServerConfig::new("127.0.0.1", 0).with_jwt_secret("secret")
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    fn count_event(token: Option<&str>) -> Request<Body> {
        let mut builder = Request::post("/internal/events")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder
            .body(Body::from(
                r#"{"event":"count_changed","user_id":"u-1","total":3,"unread":1}"#,
            ))
            .expect("request")
    }

    #[tokio::test]
    async fn test_health() {
        let server = Server::new(config()).expect("server");
        let response = server
            .router()
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["metrics"]["evictions"], 0);
    }

    #[tokio::test]
    async fn test_ingest_not_mounted_without_token() {
        let server = Server::new(config()).expect("server");
        let response = server
            .router()
            .oneshot(count_event(Some("anything")))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ingest_rejects_wrong_token() {
        let server = Server::new(config().with_ingest_token("ingest")).expect("server");

        for token in [None, Some("wrong"), Some("inges"), Some("ingest2")] {
            let response = server
                .router()
                .oneshot(count_event(token))
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn test_ingest_routes_event() {
        let server = Server::new(config().with_ingest_token("ingest")).expect("server");
        let response = server
            .router()
            .oneshot(count_event(Some("ingest")))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body, serde_json::json!({"targeted": 0, "delivered": 0, "evicted": 0}));
        assert_eq!(server.state().metrics.broadcasts(), 1);
    }
}
