//! Notification events handed to the core by the business layer.
//!
//! The business layer owns storage. It persists a notification, then hands an
//! [`OutboundNotification`] to the [`BroadcastRouter`](crate::ws::BroadcastRouter)
//! which fans it out to whoever is connected right now. Nothing here is
//! retained after the broadcast.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Delivery priority attached to a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    /// Informational.
    Low,
    /// Regular operational traffic.
    #[default]
    Normal,
    /// Needs attention soon.
    High,
    /// Needs attention now.
    Critical,
}

impl std::fmt::Display for NotificationPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Who a notification is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Audience {
    /// Every connection of a single user.
    User {
        /// Recipient user id.
        user_id: String,
    },

    /// Every connection sharing a role within a scope (e.g. all guards of a
    /// village).
    Group {
        /// Scope key, typically the village identifier.
        scope_key: String,
        /// Role name.
        role: String,
    },
}

impl Audience {
    /// Creates a single-user audience.
    #[must_use]
    pub fn user(user_id: impl Into<String>) -> Self {
        Self::User {
            user_id: user_id.into(),
        }
    }

    /// Creates a group audience.
    #[must_use]
    pub fn group(scope_key: impl Into<String>, role: impl Into<String>) -> Self {
        Self::Group {
            scope_key: scope_key.into(),
            role: role.into(),
        }
    }
}

/// A notification produced by the business layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundNotification {
    /// Notification id in the business store.
    pub id: i64,

    /// Delivery target.
    pub audience: Audience,

    /// Notification type (e.g. `visitor_request`).
    #[serde(rename = "type")]
    pub kind: String,

    /// Category used by clients for grouping.
    pub category: String,

    /// Short title.
    pub title: String,

    /// Body text.
    pub body: String,

    /// Priority.
    #[serde(default)]
    pub priority: NotificationPriority,

    /// Structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Creation time in the business store.
    pub created_at: DateTime<Utc>,

    /// Human readable scope name (e.g. the village name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_name: Option<String>,

    /// Read flag; collaborators usually send fresh, unread notifications.
    #[serde(default)]
    pub is_read: bool,

    /// When the notification was read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

impl OutboundNotification {
    /// Converts the notification into its wire representation.
    #[must_use]
    pub fn to_payload(&self) -> NotificationPayload {
        NotificationPayload {
            notification_id: self.id,
            kind: self.kind.clone(),
            category: self.category.clone(),
            title: self.title.clone(),
            message: self.body.clone(),
            data: self.data.clone(),
            is_read: self.is_read,
            priority: self.priority,
            created_at: self.created_at,
            read_at: self.read_at,
            scope_name: self.scope_name.clone(),
        }
    }
}

/// Body of a `notification` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
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
    pub priority: NotificationPriority,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Read time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    /// Scope name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_name: Option<String>,
}

/// Body of a `notification_count` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotificationCount {
    /// Total notifications for the user.
    pub total: u64,
    /// Unread notifications for the user.
    pub unread: u64,
}

/// Event posted by an out-of-process business layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CollaboratorEvent {
    /// A notification was persisted and should be broadcast.
    NotificationCreated(OutboundNotification),

    /// A user's notification counters changed.
    CountChanged {
        /// User whose counters changed.
        user_id: String,
        /// Total notifications.
        total: u64,
        /// Unread notifications.
        unread: u64,
    },
}
