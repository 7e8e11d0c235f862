// src/utils/config.rs
//! Layered configuration
//!
//! Defaults, then an optional TOML file (`mockhub.toml`, or the path in
//! `MOCKHUB_CONFIG`), then environment variables such as
//! `MOCKHUB__BROKER__WAIT_TIMEOUT_MS=5000`.

use crate::utils::errors::{MockError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default file consulted when `MOCKHUB_CONFIG` is unset
pub const DEFAULT_CONFIG_FILE: &str = "mockhub.toml";

/// Response used when no configuration matches an intercepted call
pub const GLOBAL_FALLBACK_RESPONSE: &str =
    r#"{"code": 200, "message": "Global default mock response."}"#;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    pub server: ServerConfig,
    pub broker: BrokerConfig,
    pub terminal: TerminalConfig,
    pub storage: StorageConfig,
    pub observability: ObservabilityConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address for the HTTP surface
    pub listen_addr: String,

    /// Address registered in the heartbeat table; derived from
    /// `listen_addr` when unset
    pub advertise_addr: Option<String>,

    /// Content type of intercepted-call replies
    pub response_content_type: String,

    /// Reject intercepted calls whose body is empty
    pub reject_empty_body: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            advertise_addr: None,
            response_content_type: "application/xml; charset=utf-8".to_string(),
            reject_empty_body: false,
        }
    }
}

/// Correlation engine and leadership settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// How long a suspended HTTP call waits for an operator
    pub wait_timeout_ms: u64,

    /// Bound on a single forwarded call to the primary
    pub forward_timeout_ms: u64,

    /// Heartbeats older than this are ignored by leader selection
    pub liveness_window_secs: u64,

    /// Interval between heartbeat upserts
    pub heartbeat_interval_secs: u64,

    /// Interval of the drain-on-no-observer sweep
    pub housekeeping_interval_ms: u64,

    /// Interval of `ping` events on observer streams
    pub keepalive_interval_secs: u64,

    /// Per-observer notification queue capacity (clamped to at least 1)
    pub observer_queue_capacity: usize,

    /// Reply used when no configuration exists for a call
    pub fallback_response: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 3_000,
            forward_timeout_ms: 15_000,
            liveness_window_secs: 10,
            heartbeat_interval_secs: 5,
            housekeeping_interval_ms: 1_000,
            keepalive_interval_secs: 15,
            observer_queue_capacity: 1,
            fallback_response: GLOBAL_FALLBACK_RESPONSE.to_string(),
        }
    }
}

impl BrokerConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }

    pub fn liveness_window(&self) -> Duration {
        Duration::from_secs(self.liveness_window_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_millis(self.housekeeping_interval_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }
}

/// Line-oriented terminal transport
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Listen address; the terminal server is disabled when unset
    pub listen_addr: Option<String>,

    /// Operator wait per command. Zero answers from the first source ready.
    pub wait_timeout_ms: u64,

    /// OpenSSH or PKCS#8 private key; an ephemeral key is generated when
    /// unset
    pub host_key_path: Option<PathBuf>,
}

impl TerminalConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

/// SQLite store location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("mock_config.db"),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,

    /// Prometheus scrape address; metrics are recorded but not exported
    /// when unset
    pub metrics_addr: Option<String>,
}

impl MockConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        let path = std::env::var("MOCKHUB_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&path)
    }

    /// Load configuration using an explicit file path
    pub fn load_from(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("MOCKHUB")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| MockError::ConfigError(format!("Failed to load configuration: {}", e)))?;

        let config: MockConfig = settings
            .try_deserialize()
            .map_err(|e| MockError::ConfigError(format!("Invalid configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate addresses and intervals
    pub fn validate(&self) -> Result<()> {
        self.server.listen_socket_addr()?;

        if let Some(addr) = &self.terminal.listen_addr {
            addr.parse::<SocketAddr>().map_err(|e| {
                MockError::ConfigError(format!("Invalid terminal listen address {}: {}", addr, e))
            })?;
        }

        if let Some(addr) = &self.observability.metrics_addr {
            addr.parse::<SocketAddr>().map_err(|e| {
                MockError::ConfigError(format!("Invalid metrics address {}: {}", addr, e))
            })?;
        }

        let broker = &self.broker;
        if broker.liveness_window_secs == 0 {
            return Err(MockError::ConfigError("liveness_window_secs cannot be 0".to_string()));
        }
        if broker.heartbeat_interval_secs == 0 {
            return Err(MockError::ConfigError("heartbeat_interval_secs cannot be 0".to_string()));
        }
        if broker.heartbeat_interval_secs >= broker.liveness_window_secs {
            return Err(MockError::ConfigError(
                "heartbeat_interval_secs must be shorter than liveness_window_secs".to_string(),
            ));
        }
        if broker.housekeeping_interval_ms == 0 || broker.keepalive_interval_secs == 0 {
            return Err(MockError::ConfigError(
                "housekeeping and keep-alive intervals cannot be 0".to_string(),
            ));
        }
        if broker.forward_timeout_ms == 0 {
            return Err(MockError::ConfigError("forward_timeout_ms cannot be 0".to_string()));
        }

        Ok(())
    }
}

impl ServerConfig {
    pub fn listen_socket_addr(&self) -> Result<SocketAddr> {
        self.listen_addr.parse().map_err(|e| {
            MockError::ConfigError(format!("Invalid listen address {}: {}", self.listen_addr, e))
        })
    }

    /// Address other instances use to reach this one
    pub fn advertised_address(&self) -> Result<String> {
        if let Some(addr) = &self.advertise_addr {
            return Ok(addr.clone());
        }

        let listen = self.listen_socket_addr()?;
        if listen.ip().is_unspecified() {
            Ok(format!("127.0.0.1:{}", listen.port()))
        } else {
            Ok(listen.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = MockConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.broker.observer_queue_capacity, 1);
        assert_eq!(config.terminal.wait_timeout(), Duration::ZERO);
        assert_eq!(config.broker.fallback_response, GLOBAL_FALLBACK_RESPONSE);
    }

    #[test]
    fn test_advertised_address() {
        let mut server = ServerConfig::default();
        assert_eq!(server.advertised_address().unwrap(), "127.0.0.1:8080");

        server.listen_addr = "10.0.0.5:9000".to_string();
        assert_eq!(server.advertised_address().unwrap(), "10.0.0.5:9000");

        server.advertise_addr = Some("mock-a:9000".to_string());
        assert_eq!(server.advertised_address().unwrap(), "mock-a:9000");
    }

    #[test]
    fn test_invalid_intervals() {
        let mut config = MockConfig::default();
        config.broker.heartbeat_interval_secs = 10;
        config.broker.liveness_window_secs = 10;
        assert!(config.validate().is_err());

        let mut config = MockConfig::default();
        config.server.listen_addr = "not-an-addr".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mockhub.toml");
        std::fs::write(
            &path,
            "[broker]\nwait_timeout_ms = 250\n\n[terminal]\nlisten_addr = \"127.0.0.1:2222\"\n",
        )
        .unwrap();

        let config = MockConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.broker.wait_timeout(), Duration::from_millis(250));
        assert_eq!(config.terminal.listen_addr.as_deref(), Some("127.0.0.1:2222"));
        assert_eq!(config.broker.liveness_window_secs, 10);
    }
}
