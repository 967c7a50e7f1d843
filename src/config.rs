//! Configuration module for chatverse.

use serde::Deserialize;
use std::path::Path;

use crate::{CoreError, Result};

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origins (empty = allow any, for development).
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

/// Session token configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Secret key for signing session tokens.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    /// Session time-to-live in seconds.
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
}

fn default_jwt_secret() -> String {
    // Development fallback only; deployments set this in config.toml.
    "chatverse-dev-secret".to_string()
}

fn default_session_ttl() -> u64 {
    24 * 60 * 60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            ttl_secs: default_session_ttl(),
        }
    }
}

/// Room registry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomConfig {
    /// Default room capacity when a create request does not specify one.
    #[serde(default = "default_room_capacity")]
    pub default_capacity: usize,
    /// Grace period in seconds before an emptied room is purged.
    #[serde(default = "default_purge_grace")]
    pub purge_grace_secs: u64,
    /// Interval in seconds between purge sweeps.
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

fn default_room_capacity() -> usize {
    50
}

fn default_purge_grace() -> u64 {
    60
}

fn default_purge_interval() -> u64 {
    30
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            default_capacity: default_room_capacity(),
            purge_grace_secs: default_purge_grace(),
            purge_interval_secs: default_purge_interval(),
        }
    }
}

/// Connection registry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Bound on each connection's outbound queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// AI responder configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    /// Whether the AI hook is active at all.
    #[serde(default = "default_ai_enabled")]
    pub enabled: bool,
    /// Optional HTTP endpoint for a generation service. When unset, the
    /// built-in keyword responder is used.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Timeout in seconds for a classify call.
    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,
}

fn default_ai_enabled() -> bool {
    true
}

fn default_ai_timeout() -> u64 {
    10
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: default_ai_enabled(),
            endpoint: None,
            timeout_secs: default_ai_timeout(),
        }
    }
}

/// Message history configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// History backend: "memory" or "sqlite".
    #[serde(default = "default_history_backend")]
    pub backend: String,
    /// Path to the SQLite database file (sqlite backend only).
    #[serde(default = "default_history_path")]
    pub path: String,
    /// Maximum number of messages returned by a single history request.
    #[serde(default = "default_history_limit")]
    pub max_limit: usize,
}

fn default_history_backend() -> String {
    "memory".to_string()
}

fn default_history_path() -> String {
    "data/chatverse.db".to_string()
}

fn default_history_limit() -> usize {
    200
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            backend: default_history_backend(),
            path: default_history_path(),
            max_limit: default_history_limit(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file (empty = console only).
    #[serde(default)]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: String::new(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Session settings.
    #[serde(default)]
    pub session: SessionConfig,
    /// Room settings.
    #[serde(default)]
    pub rooms: RoomConfig,
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// AI responder settings.
    #[serde(default)]
    pub ai: AiConfig,
    /// History settings.
    #[serde(default)]
    pub history: HistoryConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CoreError::Internal(format!("failed to read config: {e}")))?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| CoreError::Internal(format!("failed to parse config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.session.ttl_secs, 24 * 60 * 60);
        assert_eq!(config.rooms.default_capacity, 50);
        assert_eq!(config.rooms.purge_grace_secs, 60);
        assert_eq!(config.connection.queue_capacity, 256);
        assert!(config.ai.enabled);
        assert_eq!(config.history.backend, "memory");
    }

    #[test]
    fn test_parse_empty_toml() {
        let config = Config::from_str("").unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.history.max_limit, 200);
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml = r#"
            [server]
            port = 9000

            [rooms]
            purge_grace_secs = 10

            [ai]
            enabled = false
        "#;
        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.rooms.purge_grace_secs, 10);
        assert!(!config.ai.enabled);
        // Untouched sections keep their defaults
        assert_eq!(config.connection.queue_capacity, 256);
    }

    #[test]
    fn test_parse_ai_endpoint() {
        let toml = r#"
            [ai]
            endpoint = "http://localhost:9090/classify"
            timeout_secs = 5
        "#;
        let config = Config::from_str(toml).unwrap();
        assert_eq!(
            config.ai.endpoint.as_deref(),
            Some("http://localhost:9090/classify")
        );
        assert_eq!(config.ai.timeout_secs, 5);
    }

    #[test]
    fn test_parse_invalid_toml() {
        let result = Config::from_str("this is not [valid toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load("/nonexistent/config.toml");
        assert!(result.is_err());
    }
}
