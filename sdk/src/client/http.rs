//! HTTP client implementation.
//!
//! Provides the client for the durable notification endpoints.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{de::DeserializeOwned, Deserialize};

use super::config::ClientConfig;
use super::error::ClientError;
use crate::ws::messages::{Notification, NotificationCount};

/// API error response format.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

/// API error details.
#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    message: String,
}

/// One page of the notification list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NotificationPage {
    /// Notifications on this page, newest first.
    pub notifications: Vec<Notification>,
    /// Matching notifications across all pages.
    pub total: u64,
    /// 1-based page number.
    pub page: u32,
    /// Page size.
    pub per_page: u32,
}

/// Filters for [`NotificationsClient::list_notifications`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotificationQuery {
    /// 1-based page number.
    pub page: Option<u32>,
    /// Page size.
    pub per_page: Option<u32>,
    /// Only unread notifications.
    pub unread_only: bool,
}

impl NotificationQuery {
    /// Unread notifications, first page.
    #[must_use]
    pub fn unread() -> Self {
        Self {
            unread_only: true,
            ..Self::default()
        }
    }

    /// Sets the page.
    #[must_use]
    pub const fn page(mut self, page: u32, per_page: u32) -> Self {
        self.page = Some(page);
        self.per_page = Some(per_page);
        self
    }

    fn to_path(self) -> String {
        let mut path = "/notifications".to_string();
        let mut params = Vec::new();

        if let Some(p) = self.page {
            params.push(format!("page={}", p));
        }
        if let Some(n) = self.per_page {
            params.push(format!("per_page={}", n));
        }
        if self.unread_only {
            params.push("unread_only=true".to_string());
        }

        if !params.is_empty() {
            path.push('?');
            path.push_str(&params.join("&"));
        }
        path
    }
}

/// HTTP client for the notification endpoints.
#[derive(Debug, Clone)]
pub struct NotificationsClient {
    config: ClientConfig,
    http: reqwest::Client,
}

impl NotificationsClient {
    /// Creates a new client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be created.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(ref token) = config.access_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ClientError::InvalidConfig(e.to_string()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .user_agent(&config.user_agent)
            .build()
            .map_err(ClientError::Http)?;

        Ok(Self { config, http })
    }

    /// Creates a new client with the given base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::new(ClientConfig::new(base_url))
    }

    /// Returns the client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Makes a request with retry logic.
    ///
    /// Rate limits and timeouts are retried up to `max_retries` times. An
    /// empty success body decodes as JSON `null`.
    async fn request_with_retry<T, F>(&self, request_fn: F) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut last_error = None;
        let mut retry_count = 0;

        while retry_count <= self.config.max_retries {
            let response = request_fn().send().await;

            match response {
                Ok(resp) => {
                    let status = resp.status();

                    if status.is_success() {
                        let body = resp
                            .text()
                            .await
                            .map_err(|e| ClientError::Decode(e.to_string()))?;
                        let body = if body.trim().is_empty() { "null" } else { &body };

                        return serde_json::from_str(body)
                            .map_err(|e| ClientError::Decode(e.to_string()));
                    }

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = resp
                            .headers()
                            .get("Retry-After")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.parse().ok());

                        if retry_count < self.config.max_retries {
                            let wait_time = retry_after.unwrap_or(1);
                            tokio::time::sleep(Duration::from_secs(wait_time)).await;
                            retry_count += 1;
                            continue;
                        }

                        return Err(ClientError::RateLimited { retry_after });
                    }

                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Err(ClientError::EndpointNotFound(
                            resp.url().path().to_string(),
                        ));
                    }

                    if status == reqwest::StatusCode::UNAUTHORIZED {
                        return Err(ClientError::Unauthorized);
                    }

                    let body = resp.text().await.unwrap_or_default();
                    if let Ok(error_resp) = serde_json::from_str::<ApiErrorResponse>(&body) {
                        return Err(ClientError::Api {
                            status: status.as_u16(),
                            code: error_resp.error.code,
                            message: error_resp.error.message,
                        });
                    }

                    return Err(ClientError::Api {
                        status: status.as_u16(),
                        code: status.as_str().to_string(),
                        message: body,
                    });
                }
                Err(e) => {
                    if e.is_timeout() && retry_count < self.config.max_retries {
                        retry_count += 1;
                        tokio::time::sleep(Duration::from_millis(100 * (1 << retry_count))).await;
                        last_error = Some(ClientError::from(e));
                        continue;
                    }
                    return Err(ClientError::from(e));
                }
            }
        }

        Err(last_error.unwrap_or(ClientError::Timeout))
    }

    /// Lists notifications of the authenticated user.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn list_notifications(
        &self,
        query: &NotificationQuery,
    ) -> Result<NotificationPage, ClientError> {
        let url = self.url(&query.to_path());
        self.request_with_retry(|| self.http.get(&url)).await
    }

    /// Gets the notification counters of the authenticated user.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn unread_count(&self) -> Result<NotificationCount, ClientError> {
        let url = self.url("/notifications/unread-count");
        self.request_with_retry(|| self.http.get(&url)).await
    }

    /// Marks a notification as read.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotificationNotFound`] if the notification is
    /// unknown, or another error if the request fails.
    pub async fn mark_read(&self, notification_id: i64) -> Result<(), ClientError> {
        let url = self.url(&format!("/notifications/{}/read", notification_id));
        let _: serde::de::IgnoredAny = self
            .request_with_retry(|| self.http.post(&url))
            .await
            .map_err(|e| match e {
                ClientError::EndpointNotFound(_) => {
                    ClientError::NotificationNotFound(notification_id)
                }
                other => other,
            })?;
        Ok(())
    }
}
