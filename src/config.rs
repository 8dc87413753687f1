//! Client configuration.
//!
//! A flat [`ClientConfig`] struct loaded from TOML. Every field has a default
//! so a config file only needs to name what it changes; embedding programs
//! can also build the struct directly.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Tunables for a lobby session.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Lobby server hostname. Also the name presented during TLS
    /// certificate verification.
    #[serde(default = "default_host")]
    pub host: String,

    /// Lobby server port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// TCP connect budget, in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// How long one [`receive`](crate::LobbyClient::receive) call waits for
    /// inbound data before reporting an idle cycle, in milliseconds.
    #[serde(default = "default_recv_timeout_ms")]
    pub recv_timeout_ms: u64,

    /// Deadline for correlated requests, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Per-cycle budget for driving an in-flight TLS handshake, in
    /// milliseconds. Elapsing is the normal in-progress outcome.
    #[serde(default = "default_handshake_poll_ms")]
    pub handshake_poll_ms: u64,

    /// Total time allowed for draining the socket during a graceful close,
    /// in milliseconds.
    #[serde(default = "default_close_drain_ms")]
    pub close_drain_ms: u64,

    /// Maximum number of drain reads during a graceful close.
    #[serde(default = "default_close_drain_reads")]
    pub close_drain_reads: u32,

    /// Ceiling on a single inbound line, in bytes. A breach is treated as a
    /// broken peer and disconnects.
    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,

    /// Log a warning for server lines nothing handled.
    #[serde(default = "default_true")]
    pub warn_unhandled: bool,
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// `connect_timeout_secs` as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// `recv_timeout_ms` as a [`Duration`].
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    /// `request_timeout_secs` as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// `handshake_poll_ms` as a [`Duration`].
    pub fn handshake_poll(&self) -> Duration {
        Duration::from_millis(self.handshake_poll_ms)
    }

    /// `close_drain_ms` as a [`Duration`].
    pub fn close_drain(&self) -> Duration {
        Duration::from_millis(self.close_drain_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_secs: default_connect_timeout_secs(),
            recv_timeout_ms: default_recv_timeout_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            handshake_poll_ms: default_handshake_poll_ms(),
            close_drain_ms: default_close_drain_ms(),
            close_drain_reads: default_close_drain_reads(),
            max_line_len: default_max_line_len(),
            warn_unhandled: default_true(),
        }
    }
}

// =============================================================================
// Defaults
// =============================================================================

fn default_host() -> String {
    "lobby.springrts.com".to_string()
}

fn default_port() -> u16 {
    8200
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_recv_timeout_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_handshake_poll_ms() -> u64 {
    250
}

fn default_close_drain_ms() -> u64 {
    500
}

fn default_close_drain_reads() -> u32 {
    8
}

fn default_max_line_len() -> usize {
    65536
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_toml_is_all_defaults() {
        let config: ClientConfig = toml::from_str("").unwrap();
        assert_eq!(config.host, "lobby.springrts.com");
        assert_eq!(config.port, 8200);
        assert_eq!(config.connect_timeout_secs, 30);
        assert_eq!(config.max_line_len, 65536);
        assert!(config.warn_unhandled);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: ClientConfig = toml::from_str(
            r#"
            host = "lobby.example.net"
            port = 8300
            warn_unhandled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.host, "lobby.example.net");
        assert_eq!(config.port, 8300);
        assert!(!config.warn_unhandled);
        // Untouched fields keep their defaults.
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.handshake_poll_ms, 250);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "host = \"lobby.example.net\"").unwrap();
        writeln!(file, "recv_timeout_ms = 50").unwrap();
        file.flush().unwrap();

        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.host, "lobby.example.net");
        assert_eq!(config.recv_timeout(), Duration::from_millis(50));
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a number\"").unwrap();
        file.flush().unwrap();

        assert!(matches!(
            ClientConfig::load(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_default_matches_empty_parse() {
        let parsed: ClientConfig = toml::from_str("").unwrap();
        let built = ClientConfig::default();
        assert_eq!(parsed.port, built.port);
        assert_eq!(parsed.recv_timeout_ms, built.recv_timeout_ms);
        assert_eq!(parsed.close_drain_reads, built.close_drain_reads);
    }
}
