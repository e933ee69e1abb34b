//! # tether-core
//!
//! A resilient, correlated messaging client for desktop applications that
//! talk to a local or remote host over a long-lived connection.
//!
//! This crate contains:
//! - **Envelope**: `Message`, `MessageKind`, `Payload` - versioned JSON messages
//! - **Codec**: `LineCodec` for newline-delimited JSON via `tokio_util`
//! - **Transport**: line (TCP) and WebSocket bindings behind `Connector`
//! - **State**: `ConnectionState`, `StatusBoard`, reconnect `Backoff`
//! - **Correlator**: pending-request table matching responses to callers
//! - **Dispatcher**: routes inbound responses, events and requests
//! - **Manager**: reconnect state machine and per-session I/O loops
//! - **Client**: blocking façade for synchronous callers
//! - **Error**: `TetherError` - typed, `thiserror`-based error hierarchy

pub mod client;
pub mod codec;
pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod keepalive;
pub mod manager;
pub mod message;
pub mod observer;
pub mod queue;
pub mod state;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use client::Client;
pub use codec::{DEFAULT_MAX_LINE_LENGTH, LineCodec};
pub use config::ClientConfig;
pub use correlator::{Correlator, Outcome, WaitHandle};
pub use dispatcher::{Dispatcher, RequestHandler, Route};
pub use error::{ProtocolError, TetherError};
pub use keepalive::KeepaliveConfig;
pub use message::{Inbound, Message, MessageKind, PROTOCOL_VERSION, Params, Payload};
pub use state::{Backoff, ConnectionState, ReconnectPolicy, StatusChange};
pub use transport::{Connector, Endpoint, Transport};
pub use transport::line::line_transport;
pub use transport::websocket::websocket_transport;
