//! Wire envelope shared by both transport bindings.
//!
//! ```text
//! {
//!   "version": "1.0",
//!   "type": "request" | "response" | "event",
//!   "id": "<uuid>",
//!   "timestamp": "<RFC 3339>",
//!   "payload": { "action", "params", "result", "error" }
//! }
//! ```
//!
//! `params` and `result` are an open schema at this layer; only the
//! envelope structure is validated.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{ProtocolError, TetherError};

/// Envelope version stamped on every outbound message.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Free-form request parameters.
pub type Params = Map<String, Value>;

// ── MessageKind ──────────────────────────────────────────────────

/// Distinguishes requests, responses and unsolicited events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Request,
    Response,
    Event,
    /// Any `type` this build does not understand.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Request => write!(f, "request"),
            MessageKind::Response => write!(f, "response"),
            MessageKind::Event => write!(f, "event"),
            MessageKind::Unknown => write!(f, "unknown"),
        }
    }
}

// ── Payload ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Payload {
    /// Requested operation (request) or originating notification (event).
    #[serde(default)]
    pub action: String,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Params,

    /// Present on successful responses only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Present on failed responses only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ── Message ──────────────────────────────────────────────────────

/// One logical message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub version: String,

    #[serde(rename = "type")]
    pub kind: MessageKind,

    /// Correlation id; absent on fire-and-forget events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Creation time, informational only.
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub payload: Payload,
}

impl Message {
    fn with_kind(kind: MessageKind, id: Option<String>, payload: Payload) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            kind,
            id,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Build a request carrying a freshly generated correlation id.
    pub fn request(action: impl Into<String>, params: Params) -> Self {
        Self::with_kind(
            MessageKind::Request,
            Some(new_correlation_id()),
            Payload {
                action: action.into(),
                params,
                ..Default::default()
            },
        )
    }

    /// Build a fire-and-forget event (no id).
    pub fn event(action: impl Into<String>, params: Params) -> Self {
        Self::with_kind(
            MessageKind::Event,
            None,
            Payload {
                action: action.into(),
                params,
                ..Default::default()
            },
        )
    }

    /// Build a successful response to the request with `id`.
    pub fn success(id: impl Into<String>, action: impl Into<String>, result: Value) -> Self {
        Self::with_kind(
            MessageKind::Response,
            Some(id.into()),
            Payload {
                action: action.into(),
                result: Some(result),
                ..Default::default()
            },
        )
    }

    /// Build a failed response to the request with `id`.
    pub fn failure(id: impl Into<String>, action: impl Into<String>, error: impl Into<String>) -> Self {
        Self::with_kind(
            MessageKind::Response,
            Some(id.into()),
            Payload {
                action: action.into(),
                error: Some(error.into()),
                ..Default::default()
            },
        )
    }

    pub fn action(&self) -> &str {
        &self.payload.action
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The outcome carried by a response: `Err(Remote)` when `error` is
    /// non-empty, otherwise the result (`null` when absent).
    pub fn outcome(&self) -> Result<Value, TetherError> {
        match self.payload.error.as_deref() {
            Some(err) if !err.is_empty() => Err(TetherError::Remote(err.to_string())),
            _ => Ok(self.payload.result.clone().unwrap_or(Value::Null)),
        }
    }

    /// Serialize to a single-line JSON document.
    pub fn to_json(&self) -> Result<String, TetherError> {
        serde_json::to_string(self).map_err(|e| TetherError::Encoding(e.to_string()))
    }

    /// Parse one JSON document.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A fresh, globally unique correlation id.
pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

// ── Inbound ──────────────────────────────────────────────────────

/// One decoded unit from a transport's receive side.
///
/// Malformed frames surface as values rather than stream errors so the
/// receive loop can drop them and keep reading.
#[derive(Debug)]
pub enum Inbound {
    Message(Message),
    Malformed(ProtocolError),
}

impl Inbound {
    pub fn decode(bytes: &[u8]) -> Self {
        match Message::from_json(bytes) {
            Ok(message) => Inbound::Message(message),
            Err(e) => Inbound::Malformed(e),
        }
    }
}
