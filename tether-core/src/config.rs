//! Client configuration.
//!
//! Every section is `#[serde(default)]`, so a partial TOML/JSON document
//! fills in the rest.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::DEFAULT_MAX_LINE_LENGTH;
use crate::error::TetherError;
use crate::keepalive::KeepaliveConfig;
use crate::state::ReconnectPolicy;
use crate::transport::Endpoint;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `tcp://host:port`, bare `host:port`, or `ws://…`.
    pub endpoint: String,
    pub connect_timeout_ms: u64,
    /// Default deadline for requests when the caller names none.
    pub request_timeout_ms: u64,
    /// Upper bound on how long `disconnect` waits for the I/O thread.
    pub shutdown_grace_ms: u64,
    /// Longest accepted line on the line binding, in bytes.
    pub max_line_length: usize,
    pub reconnect: ReconnectPolicy,
    pub keepalive: KeepaliveConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "tcp://127.0.0.1:7400".to_string(),
            connect_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
            shutdown_grace_ms: 2_000,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            reconnect: ReconnectPolicy::default(),
            keepalive: KeepaliveConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn endpoint(&self) -> Result<Endpoint, TetherError> {
        Endpoint::parse(&self.endpoint)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(2));
        assert_eq!(config.max_line_length, 8 * 1024 * 1024);
        assert!(matches!(config.endpoint(), Ok(Endpoint::Line { .. })));
    }

    #[test]
    fn partial_document_keeps_defaults() {
        let config: ClientConfig = serde_json::from_str(
            r#"{"endpoint": "ws://127.0.0.1:9001/", "reconnect": {"max_attempts": 3}}"#,
        )
        .unwrap();
        assert!(matches!(config.endpoint(), Ok(Endpoint::WebSocket { .. })));
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.base_delay_ms, 5_000);
        assert_eq!(config.keepalive, KeepaliveConfig::default());
    }
}
