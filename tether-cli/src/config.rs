//! CLI configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tether_core::ClientConfig;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Connection settings.
    pub client: ClientConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl CliConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// The default configuration as TOML.
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&Self::default())
    }

    /// Write default config to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = Self::default_toml().map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = CliConfig::default_toml().unwrap();
        assert!(text.contains("endpoint"));
        assert!(text.contains("[client.reconnect]"));
        assert!(text.contains("[client.keepalive]"));
        assert!(text.contains("level"));
    }

    #[test]
    fn roundtrip_config() {
        let text = CliConfig::default_toml().unwrap();
        let parsed = CliConfig::parse(&text).unwrap();
        assert_eq!(parsed.client, ClientConfig::default());
        assert_eq!(parsed.logging.level, "info");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let parsed = CliConfig::parse(
            r#"
            [client]
            endpoint = "ws://10.0.0.5:9001/"

            [client.keepalive]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(parsed.client.endpoint, "ws://10.0.0.5:9001/");
        assert!(!parsed.client.keepalive.enabled);
        assert_eq!(parsed.client.keepalive.action, "ping");
        assert_eq!(parsed.client.reconnect.max_attempts, 10);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let cfg = CliConfig::load(Path::new("/nonexistent/tether.toml"));
        assert_eq!(cfg.client.endpoint, ClientConfig::default().endpoint);
    }

    #[test]
    fn write_then_load() {
        let path = std::env::temp_dir().join(format!("tether-cli-{}.toml", std::process::id()));
        CliConfig::write_default(&path).unwrap();
        let cfg = CliConfig::load(&path);
        let _ = std::fs::remove_file(&path);
        assert_eq!(cfg.client, ClientConfig::default());
    }
}
