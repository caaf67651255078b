//! HTTP endpoints next to the WebSocket upgrade.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{info, warn};

use crate::auth::{bearer_token, token_matches};
use crate::notification::{CollaboratorEvent, NotificationCount};
use crate::state::AppState;
use crate::ws::{BroadcastReport, WsMetricsSnapshot};

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `ok` while the process serves requests.
    pub status: &'static str,
    /// Open connections.
    pub connections: usize,
    /// Users with at least one open connection.
    pub users: usize,
    /// Metrics snapshot.
    pub metrics: WsMetricsSnapshot,
}

/// Error body returned by the HTTP endpoints.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Stable error code.
    pub code: &'static str,
    /// Human-readable message.
    pub message: String,
}

/// HTTP error with a JSON body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            body: ErrorBody {
                code: "unauthorized",
                message: "missing or invalid ingest token".to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connections: state.registry.connection_count().await,
        users: state.registry.user_count().await,
        metrics: state.metrics.snapshot(),
    })
}

/// `POST /internal/events`
///
/// Lets an out-of-process business layer push events into the router.
pub async fn ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(event): Json<CollaboratorEvent>,
) -> Result<Json<BroadcastReport>, ApiError> {
    let authorized = match (&state.config.ingest_token, bearer_token(&headers)) {
        (Some(expected), Some(given)) => token_matches(&given, expected),
        _ => false,
    };
    if !authorized {
        warn!("rejected ingest request");
        return Err(ApiError::unauthorized());
    }

    let report = match event {
        CollaboratorEvent::NotificationCreated(notification) => {
            info!(notification_id = notification.id, "ingested notification");
            state.router.publish(&notification).await
        }
        CollaboratorEvent::CountChanged {
            user_id,
            total,
            unread,
        } => {
            state
                .router
                .publish_count(&user_id, NotificationCount { total, unread })
                .await
        }
    };

    Ok(Json(report))
}
