//! Domain-specific error types for the tether client.
//!
//! All fallible operations return `Result<T, TetherError>`.
//! A malformed inbound frame is described by [`ProtocolError`]; it is
//! logged and dropped by the receive path and never tears down a
//! connection on its own.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the tether client.
#[derive(Debug, Error)]
pub enum TetherError {
    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The WebSocket layer reported an error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// The transport could not be established within the connect timeout.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    PeerClosed,

    /// The keepalive exchange did not observe the peer.
    #[error("keepalive failed: {0}")]
    KeepaliveFailed(String),

    /// The reconnect budget is exhausted; no further automatic attempts.
    #[error("gave up after {attempts} reconnect attempts")]
    MaxReconnectAttemptsExceeded { attempts: u32 },

    /// The endpoint string names no supported transport.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    // ── Request Errors ───────────────────────────────────────────
    /// A request exceeded its caller-supplied deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The peer answered with a non-empty `error` field.
    #[error("remote error: {0}")]
    Remote(String),

    /// The client has no live session (`DISCONNECTED` or `ERROR`).
    #[error("not connected")]
    NotConnected,

    /// The session was torn down while the request was outstanding.
    #[error("disconnected")]
    Disconnected,

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Protocol / Serialization Errors ──────────────────────────
    /// An inbound frame was rejected.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Encoding of an outbound message failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl TetherError {
    /// Returns `true` for faults that end a connection and feed the
    /// reconnect machine, as opposed to per-request outcomes.
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::WebSocket(_)
                | Self::ConnectTimeout(_)
                | Self::PeerClosed
                | Self::KeepaliveFailed(_)
                | Self::ChannelClosed
        )
    }
}

// ── ProtocolError ─────────────────────────────────────────────────

/// Why a single inbound frame or line was dropped.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame was not a well-formed envelope.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A line exceeded the configured maximum length.
    #[error("line exceeds {max} bytes")]
    LineTooLong { max: usize },

    /// The transport delivered a frame type the envelope cannot live in.
    #[error("unexpected {0} frame")]
    UnexpectedFrame(&'static str),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for TetherError {
    fn from(s: String) -> Self {
        TetherError::Other(s)
    }
}

impl From<&str> for TetherError {
    fn from(s: &str) -> Self {
        TetherError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for TetherError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        TetherError::ChannelClosed
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TetherError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => TetherError::PeerClosed,
            WsError::Io(io) => TetherError::Connection(io),
            other => TetherError::WebSocket(other.to_string()),
        }
    }
}
