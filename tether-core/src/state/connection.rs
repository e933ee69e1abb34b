//! Connection lifecycle state machine.
//!
//! Models the client's view of its link to the peer, with validated
//! transitions that return `Result` instead of panicking.

use std::fmt;

use crate::error::TetherError;

// ── ConnectionState ──────────────────────────────────────────────

/// The current phase of the client connection.
///
/// ```text
///                 ┌───────────── failure (no retry) ──────────────┐
///                 │                                               ▼
///  Disconnected ──► Connecting ──► Connected ──► Reconnecting    Error
///       ▲   ▲          ▲  │                        │    │         │
///       │   │          │  └──── failure (retry) ───┘    │         │
///       │   │          └──────── delay elapsed ─────────┘         │
///       │   └───── lost (no retry) / disconnect() ◄── any state   │
///       └──────────────────────────── connect() ◄─────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No session. Initial state and the result of `disconnect()`.
    #[default]
    Disconnected,

    /// A transport is being established.
    Connecting,

    /// The transport is up; loops are running.
    Connected,

    /// Waiting out the backoff delay before the next attempt.
    Reconnecting,

    /// Gave up; no automatic attempts until `connect()` is called again.
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Connected => write!(f, "CONNECTED"),
            Self::Reconnecting => write!(f, "RECONNECTING"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// A background session exists and will carry queued messages.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Reconnecting)
    }

    /// No session exists; only `connect()` leaves this state.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (*self, next) {
            (_, Disconnected) => true,
            (Disconnected | Error, Connecting) => true,
            (Connecting, Connected | Reconnecting | Error) => true,
            (Connected, Reconnecting) => true,
            (Reconnecting, Connecting | Error) => true,
            _ => false,
        }
    }

    /// Move to `next`, validating the edge.
    pub fn transition_to(&mut self, next: ConnectionState) -> Result<(), TetherError> {
        if self.can_transition_to(next) {
            *self = next;
            Ok(())
        } else {
            Err(TetherError::Other(format!(
                "invalid connection transition {self} -> {next}"
            )))
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
