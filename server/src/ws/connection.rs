//! WebSocket connection state management.
//!
//! A [`Connection`] is the registry's handle on one authenticated socket. The
//! socket itself is owned by a writer task; the connection only holds the
//! sending half of that task's channel and a termination signal, so dropping
//! the connection is what terminates the socket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use super::messages::ServerMessage;
use crate::auth::Identity;

/// Connection identifier.
pub type ConnectionId = u64;

/// Global connection ID counter.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generates a unique connection ID.
#[must_use]
pub fn next_connection_id() -> ConnectionId {
    CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// WebSocket close codes used by the server.
pub mod close_code {
    /// Endpoint going away; used for heartbeat eviction.
    pub const GOING_AWAY: u16 = 1001;
    /// Frame payload could not be understood.
    pub const INVALID_PAYLOAD: u16 = 1007;
    /// Credential missing or rejected.
    pub const POLICY_VIOLATION: u16 = 1008;
    /// Server could not keep up with the connection.
    pub const TRY_AGAIN_LATER: u16 = 1013;
}

/// A frame queued for a socket's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// JSON text frame, shared between all recipients of a broadcast.
    Text(Arc<str>),

    /// WebSocket ping control frame.
    Ping,

    /// Close the socket with the given code and reason.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: &'static str,
    },
}

impl Outbound {
    /// Serializes a server message into a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be serialized.
    pub fn json(message: &ServerMessage) -> Result<Self, serde_json::Error> {
        serde_json::to_string(message).map(|json| Self::Text(json.into()))
    }
}

/// One authenticated socket session.
#[derive(Debug)]
pub struct Connection {
    /// Unique connection ID.
    id: ConnectionId,

    /// Authenticated owner.
    identity: Identity,

    /// Sender feeding the socket writer task.
    sender: mpsc::Sender<Outbound>,

    /// Dropped together with the connection; wakes the socket task.
    _terminate: oneshot::Sender<()>,

    /// Receiving end of `_terminate`, until the socket task takes it.
    termination: Option<oneshot::Receiver<()>>,

    /// Set when a ping was sent and no pong has arrived since.
    awaiting_pong: bool,

    /// Last time the client showed signs of life.
    last_activity: DateTime<Utc>,

    /// Handshake time.
    connected_at: DateTime<Utc>,
}

impl Connection {
    /// Creates a new connection.
    #[must_use]
    pub fn new(identity: Identity, sender: mpsc::Sender<Outbound>) -> Self {
        let now = Utc::now();
        let (terminate, termination) = oneshot::channel();
        Self {
            id: next_connection_id(),
            identity,
            sender,
            _terminate: terminate,
            termination: Some(termination),
            awaiting_pong: false,
            last_activity: now,
            connected_at: now,
        }
    }

    /// Returns the connection ID.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the authenticated identity.
    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Returns the owning user id.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.identity.user_id
    }

    /// Returns true unless a ping is still unanswered.
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        !self.awaiting_pong
    }

    /// Takes the signal that resolves once the connection is dropped, by
    /// eviction or unregistration. Returns `None` after the first call.
    pub fn take_termination(&mut self) -> Option<oneshot::Receiver<()>> {
        self.termination.take()
    }

    /// Returns a clone of the outbound sender.
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<Outbound> {
        self.sender.clone()
    }

    /// Queues a frame without waiting.
    ///
    /// Returns false if the writer is gone or its buffer is full.
    pub fn try_send(&self, frame: Outbound) -> bool {
        self.sender.try_send(frame).is_ok()
    }

    /// Marks the connection as waiting for a pong.
    pub fn mark_awaiting_pong(&mut self) {
        self.awaiting_pong = true;
    }

    /// Records a pong (or any other proof of life).
    pub fn record_pong(&mut self) {
        self.awaiting_pong = false;
        self.touch();
    }

    /// Refreshes the last activity timestamp.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Asks the writer to close the socket, then releases the sender.
    ///
    /// The close frame is best-effort: when the buffer is full the writer
    /// still terminates once it observes the dropped sender.
    pub fn close(self, code: u16, reason: &'static str) {
        let _ = self.sender.try_send(Outbound::Close { code, reason });
    }

    /// Returns a serializable view of the connection.
    #[must_use]
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            identity: self.identity.clone(),
            is_alive: self.is_alive(),
            last_activity: self.last_activity,
            connected_at: self.connected_at,
        }
    }
}

/// Read-only view of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    /// Connection ID.
    pub id: ConnectionId,
    /// Owner.
    #[serde(flatten)]
    pub identity: Identity,
    /// False while a ping is unanswered.
    pub is_alive: bool,
    /// Last proof of life.
    pub last_activity: DateTime<Utc>,
    /// Handshake time.
    pub connected_at: DateTime<Utc>,
}
