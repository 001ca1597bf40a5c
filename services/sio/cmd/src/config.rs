//! Configuration for the sio client binary.
//!
//! Values come from an optional YAML file, then `SIO_*` environment
//! variables, then command-line flags (applied in `main`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sio_session::{FixedBackoff, SessionConfig, WebSocketConnector};
use sio_wire::ProtocolVersion;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Client configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server connection settings
    pub server: ServerConfig,
    /// Session tuning
    pub session: SessionSettings,
}

/// Where and how to connect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Use `wss://`
    pub secure: bool,
    /// engine.io protocol version; anything but 3 means 4
    pub protocol: u8,
    /// Exchange msgpack binary frames
    pub binary: bool,
    pub connect_timeout_ms: u64,
}

/// Session limits and timings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub queue_capacity: usize,
    pub push_timeout_ms: u64,
    pub max_reconnect_attempts: u32,
    /// Fixed delay between reconnects; unset keeps the quadratic default
    pub reconnect_delay_ms: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3000,
            secure: false,
            protocol: 4,
            binary: false,
            connect_timeout_ms: 10_000,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            queue_capacity: defaults.queue_capacity,
            push_timeout_ms: defaults.push_timeout.as_millis() as u64,
            max_reconnect_attempts: defaults.max_reconnect_attempts,
            reconnect_delay_ms: None,
        }
    }
}

impl ClientConfig {
    /// Load from `path` (defaults when absent) and apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());

        info!(
            "Client configuration: {}:{} secure={} protocol={} binary={}",
            config.server.host,
            config.server.port,
            config.server.secure,
            config.server.protocol,
            config.server.binary
        );
        Ok(config)
    }

    /// Parse a YAML file. A missing file yields the defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config file {:?} not found, using defaults", path);
                return Ok(Self::default());
            }
            Err(e) => return Err(e).with_context(|| format!("reading {:?}", path)),
        };

        let config = serde_yaml::from_str::<Self>(&content).with_context(|| format!("parsing {:?}", path))?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Apply `SIO_HOST`, `SIO_PORT`, `SIO_SECURE`, `SIO_PROTOCOL` and `SIO_BINARY`
    /// as returned by `lookup`. Unparseable values are ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("SIO_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("SIO_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!("Ignoring invalid SIO_PORT={}", port),
            }
        }
        if let Some(secure) = lookup("SIO_SECURE") {
            self.server.secure = parse_flag(&secure);
        }
        if let Some(protocol) = lookup("SIO_PROTOCOL") {
            match protocol.parse() {
                Ok(protocol) => self.server.protocol = protocol,
                Err(_) => warn!("Ignoring invalid SIO_PROTOCOL={}", protocol),
            }
        }
        if let Some(binary) = lookup("SIO_BINARY") {
            self.server.binary = parse_flag(&binary);
        }
    }

    /// Endpoint URL without the protocol query
    pub fn url(&self) -> String {
        sio_session::socket_io_url(&self.server.host, self.server.port, self.server.secure)
    }

    /// Requested protocol version
    pub fn protocol(&self) -> ProtocolVersion {
        ProtocolVersion::from_requested(self.server.protocol)
    }

    pub fn connector(&self) -> WebSocketConnector {
        WebSocketConnector {
            protocol: self.protocol(),
            use_binary: self.server.binary,
            connect_timeout: Duration::from_millis(self.server.connect_timeout_ms),
            ..WebSocketConnector::default()
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig {
            queue_capacity: self.session.queue_capacity,
            push_timeout: Duration::from_millis(self.session.push_timeout_ms),
            max_reconnect_attempts: self.session.max_reconnect_attempts,
            ..SessionConfig::default()
        };
        if let Some(delay) = self.session.reconnect_delay_ms {
            config.backoff = Arc::new(FixedBackoff(Duration::from_millis(delay)));
        }
        config
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.session.queue_capacity, 10_000);
        assert_eq!(config.session.max_reconnect_attempts, 5);
        assert_eq!(config.url(), "ws://localhost:3000/socket.io/?transport=websocket");
    }

    #[test]
    fn test_load_from_file() {
        let yaml = r#"
server:
  host: chat.example.com
  port: 443
  secure: true
  protocol: 3
session:
  queue_capacity: 500
  reconnect_delay_ms: 250
"#;
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = ClientConfig::load_from_file(file.path()).unwrap();

        assert_eq!(config.server.host, "chat.example.com");
        assert!(config.server.secure);
        assert!(!config.server.binary);
        assert_eq!(config.protocol(), ProtocolVersion::V3);
        assert_eq!(config.session.queue_capacity, 500);
        assert_eq!(config.session.push_timeout_ms, 30_000);

        let session = config.session_config();
        assert_eq!(session.queue_capacity, 500);
        assert_eq!(session.backoff.delay(4), Duration::from_millis(250));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = ClientConfig::load_from_file(Path::new("/nonexistent/sio.yaml")).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"server: [unclosed").unwrap();

        assert!(ClientConfig::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = [
            ("SIO_HOST", "10.0.0.5"),
            ("SIO_PORT", "not-a-port"),
            ("SIO_SECURE", "true"),
            ("SIO_PROTOCOL", "7"),
            ("SIO_BINARY", "1"),
        ]
        .into_iter()
        .collect();

        let mut config = ClientConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.host, "10.0.0.5");
        assert_eq!(config.server.port, 3000);
        assert!(config.server.secure);
        assert!(config.server.binary);
        // unknown versions fall back to the newest
        assert_eq!(config.protocol(), ProtocolVersion::V4);
        assert!(config.connector().use_binary);
    }
}
