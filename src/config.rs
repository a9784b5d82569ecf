//! Lobby Server Configuration
//!
//! Configuration loaded from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::storage::StorageBackend;

/// Lobby server configuration.
#[derive(Debug, Clone)]
pub struct LobbyConfig {
    /// Address the WebSocket listener binds to.
    pub listen_addr: SocketAddr,
    /// Address the HTTP API (metrics, moderation) binds to.
    pub http_addr: SocketAddr,
    /// Maximum message size in bytes.
    pub max_message_size: usize,
    /// Malformed messages an address may send per window before it is
    /// throttled.
    pub max_bad_messages: u32,
    /// Throttle window length in seconds.
    pub bad_message_window_secs: u64,
    /// Idle timeout in seconds (for slowloris protection).
    pub idle_timeout_secs: u64,
    /// Storage backend (memory or sqlite).
    pub storage_backend: StorageBackend,
    /// Data directory for persistent storage.
    pub data_dir: PathBuf,
    /// Bearer token protecting the metrics endpoint, if set.
    pub metrics_token: Option<String>,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        LobbyConfig {
            listen_addr: "0.0.0.0:8080".parse().unwrap(),
            http_addr: "127.0.0.1:9090".parse().unwrap(),
            max_message_size: 1_048_576, // 1 MB
            max_bad_messages: 5,
            bad_message_window_secs: 60,
            idle_timeout_secs: 300, // 5 minutes (slowloris protection)
            storage_backend: StorageBackend::Sqlite, // Persistent by default
            data_dir: PathBuf::from("./data"),
            metrics_token: None,
        }
    }
}

impl LobbyConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("LOBBY_LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.listen_addr = parsed;
            }
        }

        if let Ok(addr) = std::env::var("LOBBY_HTTP_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.http_addr = parsed;
            }
        }

        if let Ok(val) = std::env::var("LOBBY_MAX_MESSAGE_SIZE") {
            if let Ok(parsed) = val.parse() {
                config.max_message_size = parsed;
            }
        }

        if let Ok(val) = std::env::var("LOBBY_MAX_BAD_MESSAGES") {
            if let Ok(parsed) = val.parse() {
                config.max_bad_messages = parsed;
            }
        }

        if let Ok(val) = std::env::var("LOBBY_BAD_MESSAGE_WINDOW") {
            if let Ok(parsed) = val.parse() {
                config.bad_message_window_secs = parsed;
            }
        }

        if let Ok(val) = std::env::var("LOBBY_IDLE_TIMEOUT") {
            if let Ok(parsed) = val.parse() {
                config.idle_timeout_secs = parsed;
            }
        }

        if let Ok(val) = std::env::var("LOBBY_STORAGE_BACKEND") {
            config.storage_backend = match val.to_lowercase().as_str() {
                "memory" => StorageBackend::Memory,
                _ => StorageBackend::Sqlite,
            };
        }

        if let Ok(val) = std::env::var("LOBBY_DATA_DIR") {
            config.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("LOBBY_METRICS_TOKEN") {
            if !val.is_empty() {
                config.metrics_token = Some(val);
            }
        }

        config
    }

    /// Returns the idle timeout as a Duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Returns the throttle window as a Duration.
    pub fn bad_message_window(&self) -> Duration {
        Duration::from_secs(self.bad_message_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LobbyConfig::default();

        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.http_addr.port(), 9090);
        assert_eq!(config.max_message_size, 1_048_576);
        assert_eq!(config.max_bad_messages, 5);
        assert_eq!(config.bad_message_window_secs, 60);
        assert_eq!(config.idle_timeout_secs, 300);
        assert_eq!(config.storage_backend, StorageBackend::Sqlite);
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert!(config.metrics_token.is_none());
    }

    #[test]
    fn test_bad_message_window_duration() {
        let config = LobbyConfig::default();
        assert_eq!(config.bad_message_window(), Duration::from_secs(60));
    }

    #[test]
    fn test_idle_timeout_duration() {
        let config = LobbyConfig::default();
        assert_eq!(config.idle_timeout(), Duration::from_secs(300));
    }
}
