//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (ROOMCAST_*)
//! - TOML configuration file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Presence configuration.
    #[serde(default)]
    pub presence: PresenceConfig,

    /// Validation limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Presence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Seconds a dropped connection may silently reconnect before the user
    /// is announced as having left.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
}

impl PresenceConfig {
    /// The grace period as a [`Duration`].
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

/// Validation limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum username length in characters.
    #[serde(default = "default_max_username_length")]
    pub max_username_length: usize,

    /// Maximum room name length in characters.
    #[serde(default = "default_max_room_length")]
    pub max_room_length: usize,

    /// Maximum message length in characters.
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("ROOMCAST_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("ROOMCAST_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_grace_period_secs() -> u64 {
    5
}

fn default_max_username_length() -> usize {
    50
}

fn default_max_room_length() -> usize {
    100
}

fn default_max_message_length() -> usize {
    2000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            presence: PresenceConfig::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period_secs(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_username_length: default_max_username_length(),
            max_room_length: default_max_room_length(),
            max_message_length: default_max_message_length(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "roomcast.toml",
            "/etc/roomcast/roomcast.toml",
            "~/.config/roomcast/roomcast.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host/port do not form a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.presence.grace_period_secs, 5);
        assert_eq!(config.presence.grace_period(), Duration::from_secs(5));
        assert_eq!(config.limits.max_username_length, 50);
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [presence]
            grace_period_secs = 10

            [limits]
            max_message_length = 500
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.presence.grace_period_secs, 10);
        assert_eq!(config.limits.max_message_length, 500);
        // Untouched sections keep their defaults.
        assert_eq!(config.limits.max_username_length, 50);
        assert_eq!(config.transport.websocket_path, "/ws");
    }
}
