//! Connection lifecycle and reconnect policy.
//!
//! ```text
//! Closed --connect--> Connecting --open--> Open --close/error--> Closed
//!                                                   |
//!                      attempts exhausted ----------+--> Disconnected
//! ```
//!
//! The machine holds no timers. It tells the caller whether to reconnect
//! and how long to wait; the client runtime does the waiting.

use std::fmt;
use std::time::Duration;

use crate::backoff::Backoff;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket. A reconnect may be pending.
    Closed,
    /// Handshake in progress.
    Connecting,
    /// Socket open.
    Open,
    /// Gave up reconnecting. Only an explicit `connect` leaves this state.
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Why a socket closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    /// Local `close()`.
    Deliberate,
    /// The server closed the socket.
    Remote,
    /// Transport failure or a failed connection attempt.
    Error,
}

/// What to do after a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Reconnect after `delay`.
    Retry {
        /// 1-based attempt number.
        attempt: u32,
        /// Wait before the attempt.
        delay: Duration,
    },
    /// The close was deliberate; stay closed.
    Stop,
    /// Attempts exhausted.
    GiveUp {
        /// Consecutive attempts made.
        attempts: u32,
    },
}

/// Explicit connection state machine with capped exponential backoff.
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    backoff: Backoff,
    max_attempts: Option<u32>,
    attempts: u32,
    deliberate: bool,
}

impl ConnectionStateMachine {
    /// Creates a closed machine.
    #[must_use]
    pub const fn new(backoff: Backoff, max_attempts: Option<u32>) -> Self {
        Self {
            state: ConnectionState::Closed,
            backoff,
            max_attempts,
            attempts: 0,
            deliberate: false,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive reconnect attempts since the last successful open.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Starts a connection attempt.
    pub fn connect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            self.attempts = 0;
        }
        self.deliberate = false;
        self.state = ConnectionState::Connecting;
    }

    /// The socket opened. Resets the attempt counter.
    pub fn on_open(&mut self) {
        self.state = ConnectionState::Open;
        self.attempts = 0;
    }

    /// An explicit connection attempt failed. No reconnect is scheduled.
    pub fn on_connect_failed(&mut self) {
        self.state = ConnectionState::Closed;
    }

    /// Marks the next close as deliberate.
    pub fn request_disconnect(&mut self) {
        self.deliberate = true;
    }

    /// Records a close and decides whether to reconnect.
    pub fn on_close(&mut self, cause: CloseCause) -> ReconnectDecision {
        if self.deliberate || cause == CloseCause::Deliberate {
            self.state = ConnectionState::Closed;
            return ReconnectDecision::Stop;
        }

        if self.max_attempts.is_some_and(|max| self.attempts >= max) {
            self.state = ConnectionState::Disconnected;
            return ReconnectDecision::GiveUp {
                attempts: self.attempts,
            };
        }

        self.state = ConnectionState::Closed;
        self.attempts += 1;
        ReconnectDecision::Retry {
            attempt: self.attempts,
            delay: self.backoff.delay(self.attempts - 1),
        }
    }
}
