//! Errors returned by [`NotificationsClient`](super::NotificationsClient).

/// Failure talking to the durable notification endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level failure.
    #[error("notification request failed: {0}")]
    Http(#[source] reqwest::Error),

    /// The request did not complete within the configured timeout.
    #[error("notification request timed out")]
    Timeout,

    /// The access token was missing, expired or rejected (401).
    #[error("access token rejected by the notification service")]
    Unauthorized,

    /// Too many requests (429) and the retry budget is spent.
    #[error("notification service is rate limiting{}", retry_hint(.retry_after))]
    RateLimited {
        /// Seconds suggested by `Retry-After`.
        retry_after: Option<u64>,
    },

    /// The notification does not exist or belongs to another user.
    #[error("notification {0} not found")]
    NotificationNotFound(i64),

    /// The endpoint path is unknown to the server (404).
    #[error("notification endpoint not found: {0}")]
    EndpointNotFound(String),

    /// The service answered with an error body.
    #[error("notification service error {status} [{code}]: {message}")]
    Api {
        /// HTTP status.
        status: u16,
        /// Error code from the body, or the status when the body had none.
        code: String,
        /// Error message.
        message: String,
    },

    /// A success body that does not match the expected shape.
    #[error("unexpected notification response: {0}")]
    Decode(String),

    /// Invalid client configuration.
    #[error("invalid notifications client configuration: {0}")]
    InvalidConfig(String),
}

fn retry_hint(retry_after: &Option<u64>) -> String {
    retry_after
        .map(|secs| format!(", retry after {secs}s"))
        .unwrap_or_default()
}

impl ClientError {
    /// Returns true if the same request may succeed later.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout | Self::RateLimited { .. })
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(err)
        }
    }
}
