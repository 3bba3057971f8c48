//! Relay configuration
//!
//! Loads listener and transport settings from a TOML file. Every field has a
//! default, so a missing file or a partial one is fine.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::server::JSON_SUBPROTOCOL;

/// Default listen port
pub const DEFAULT_PORT: u16 = 3000;

/// Default bind address
pub const DEFAULT_BIND: &str = "0.0.0.0";

/// Errors that can occur during config operations
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
    /// Origins allowed to open a session; empty allows any
    pub allowed_origins: Vec<String>,
    /// Subprotocol selected when the client offers it
    pub subprotocol: Option<String>,
    /// Frames buffered per client before new ones are dropped
    pub outbound_capacity: usize,
    /// Largest inbound message accepted, in bytes
    pub max_message_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            allowed_origins: Vec::new(),
            subprotocol: Some(JSON_SUBPROTOCOL.to_string()),
            outbound_capacity: 256,
            max_message_size: 64 * 1024,
        }
    }
}

impl RelayConfig {
    /// Load configuration from `path`, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: RelayConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Override the bind address
    pub fn with_bind(mut self, bind: Option<String>) -> Self {
        if let Some(bind) = bind {
            self.bind = bind;
        }
        self
    }

    /// Override the port
    pub fn with_port(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.port = port;
        }
        self
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Whether a session from `origin` may be accepted
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        origin.is_some_and(|origin| self.allowed_origins.iter().any(|allowed| allowed == origin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.socket_addr(), "0.0.0.0:3000");
        assert_eq!(config.subprotocol.as_deref(), Some("json"));
        assert!(config.allowed_origins.is_empty());
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let dir = tempdir().unwrap();
        let config = RelayConfig::load(&dir.path().join("relay.toml")).unwrap();
        assert_eq!(config, RelayConfig::default());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        fs::write(
            &path,
            r#"
port = 8080
allowed_origins = ["http://localhost:8080"]
"#,
        )
        .unwrap();

        let config = RelayConfig::load(&path).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.bind, DEFAULT_BIND);
        assert_eq!(config.allowed_origins, vec!["http://localhost:8080"]);
        assert_eq!(config.outbound_capacity, 256);
    }

    #[test]
    fn test_parse_invalid_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        fs::write(&path, "port = \"not a number\"").unwrap();

        let result = RelayConfig::load(&path);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_cli_overrides() {
        let config = RelayConfig::default()
            .with_bind(Some("127.0.0.1".to_string()))
            .with_port(Some(9000));
        assert_eq!(config.socket_addr(), "127.0.0.1:9000");

        let config = config.with_bind(None).with_port(None);
        assert_eq!(config.socket_addr(), "127.0.0.1:9000");
    }

    #[test]
    fn test_origin_policy() {
        let open = RelayConfig::default();
        assert!(open.origin_allowed(None));
        assert!(open.origin_allowed(Some("http://evil.example")));

        let closed = RelayConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            ..RelayConfig::default()
        };
        assert!(closed.origin_allowed(Some("http://localhost:3000")));
        assert!(!closed.origin_allowed(Some("http://evil.example")));
        assert!(!closed.origin_allowed(None));
    }
}
