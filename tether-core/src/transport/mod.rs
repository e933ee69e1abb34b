//! Transports: one live connection per attempt, presented as a message
//! sink plus an inbound stream regardless of binding.
//!
//! | Binding     | Endpoint            | Framing                         |
//! |-------------|---------------------|---------------------------------|
//! | `line`      | `tcp://host:port`   | newline-delimited JSON          |
//! | `websocket` | `ws://host:port/…`  | one JSON document per text frame |

pub mod line;
pub mod websocket;

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Sink, Stream};

use crate::error::TetherError;
use crate::message::{Inbound, Message};

pub use line::LineConnector;
pub use websocket::WebSocketConnector;

/// Outbound half of a transport.
pub type MessageSink = Pin<Box<dyn Sink<Message, Error = TetherError> + Send>>;

/// Inbound half of a transport. Ends when the peer closes; yields
/// `Err` only for faults that end the connection.
pub type InboundStream = Pin<Box<dyn Stream<Item = Result<Inbound, TetherError>> + Send>>;

/// A connected transport, owned by the connection manager for the
/// lifetime of one session.
pub struct Transport {
    pub sink: MessageSink,
    pub stream: InboundStream,
    /// Human-readable peer description for logs.
    pub peer: String,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport").field("peer", &self.peer).finish()
    }
}

/// Establishes a fresh [`Transport`] for each connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Transport, TetherError>;

    /// Where this connector points, for logs.
    fn describe(&self) -> String;
}

// ── Endpoint ─────────────────────────────────────────────────────

/// A parsed endpoint string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `tcp://host:port` or bare `host:port`.
    Line { address: String },
    /// `ws://…`.
    WebSocket { url: String },
}

impl Endpoint {
    pub fn parse(raw: &str) -> Result<Self, TetherError> {
        let raw = raw.trim();
        if raw.starts_with("ws://") {
            return Ok(Endpoint::WebSocket {
                url: raw.to_string(),
            });
        }
        if raw.starts_with("wss://") {
            return Err(TetherError::InvalidEndpoint(format!(
                "{raw}: TLS WebSocket endpoints are not supported"
            )));
        }

        let address = raw.strip_prefix("tcp://").unwrap_or(raw);
        if address.contains("://") {
            return Err(TetherError::InvalidEndpoint(format!(
                "{raw}: unsupported scheme"
            )));
        }
        match address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Endpoint::Line {
                    address: address.to_string(),
                })
            }
            _ => Err(TetherError::InvalidEndpoint(format!(
                "{raw}: expected host:port"
            ))),
        }
    }

    /// Build the connector for this endpoint.
    pub fn connector(&self, max_line_length: usize) -> Arc<dyn Connector> {
        match self {
            Endpoint::Line { address } => {
                Arc::new(LineConnector::new(address.clone()).with_max_line_length(max_line_length))
            }
            Endpoint::WebSocket { url } => Arc::new(WebSocketConnector::new(url.clone())),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Line { address } => write!(f, "tcp://{address}"),
            Endpoint::WebSocket { url } => write!(f, "{url}"),
        }
    }
}
