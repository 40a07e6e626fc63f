//! # Configuration Management
//!
//! Centralized configuration for both roles.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()`
//!
//! ## Limits
//! Payload size and outbound queue depth are unbounded by default. Setting
//! `transport.max_payload_size` or `transport.max_outbound_queue` caps them; a
//! peer exceeding the payload cap is disconnected, a sender exceeding the queue
//! cap gets `ProtocolError::Backpressure`.

use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// First id handed to a validated connection
pub const FIRST_CONNECTION_ID: u32 = 10_000;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Acceptor-side configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Initiator-side configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Framing and queue limits shared by both roles
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("DUPLEX_NET_SERVER_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(max) = std::env::var("DUPLEX_NET_MAX_CONNECTIONS") {
            config.server.max_connections = max.parse::<usize>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid DUPLEX_NET_MAX_CONNECTIONS: {e}"))
            })?;
        }

        if let Ok(ms) = std::env::var("DUPLEX_NET_HANDSHAKE_TIMEOUT_MS") {
            let val = ms.parse::<u64>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid DUPLEX_NET_HANDSHAKE_TIMEOUT_MS: {e}"))
            })?;
            config.server.handshake_timeout = Duration::from_millis(val);
            config.client.handshake_timeout = Duration::from_millis(val);
        }

        if let Ok(ms) = std::env::var("DUPLEX_NET_CONNECT_TIMEOUT_MS") {
            let val = ms.parse::<u64>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid DUPLEX_NET_CONNECT_TIMEOUT_MS: {e}"))
            })?;
            config.client.connect_timeout = Duration::from_millis(val);
        }

        if let Ok(bytes) = std::env::var("DUPLEX_NET_MAX_PAYLOAD_SIZE") {
            let val = bytes.parse::<usize>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid DUPLEX_NET_MAX_PAYLOAD_SIZE: {e}"))
            })?;
            config.transport.max_payload_size = Some(val);
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Acceptor-side configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g., "0.0.0.0:60000"); port 0 picks a free port
    pub address: String,

    /// Id handed to the first validated connection; later ones count up from here
    pub first_connection_id: u32,

    /// Accepted sockets beyond this many registered connections are dropped
    pub max_connections: usize,

    /// Time a new peer has to answer the handshake challenge
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("0.0.0.0:60000"),
            first_connection_id: FIRST_CONNECTION_ID,
            max_connections: 10_000,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if !is_host_port(&self.address) {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:60000')",
                self.address
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        if self.handshake_timeout.as_millis() < 100 {
            errors.push("Handshake timeout too short (minimum: 100ms)".to_string());
        } else if self.handshake_timeout.as_secs() > 300 {
            errors.push("Handshake timeout too long (maximum: 300s)".to_string());
        }

        errors
    }
}

/// Initiator-side configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Bound on resolving and connecting to the server
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Bound on receiving the server's challenge and answering it
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: timeout::CONNECT_TIMEOUT,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.connect_timeout.as_millis() < 100 {
            errors.push("Connect timeout too short (minimum: 100ms)".to_string());
        } else if self.connect_timeout.as_secs() > 300 {
            errors.push("Connect timeout too long (maximum: 300s)".to_string());
        }

        if self.handshake_timeout.as_millis() < 100 {
            errors.push("Handshake timeout too short (minimum: 100ms)".to_string());
        }

        errors
    }
}

/// Framing and queue limits
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct TransportConfig {
    /// Largest payload accepted from or sent to a peer; `None` means unbounded
    #[serde(default)]
    pub max_payload_size: Option<usize>,

    /// Largest number of envelopes waiting on one connection; `None` means unbounded
    #[serde(default)]
    pub max_outbound_queue: Option<usize>,
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Some(limit) = self.max_payload_size {
            if limit == 0 {
                errors.push("Max payload size cannot be 0".to_string());
            } else if limit > u32::MAX as usize {
                errors.push(format!(
                    "Max payload size {limit} exceeds what a u32 length can describe"
                ));
            }
        }

        if self.max_outbound_queue == Some(0) {
            errors.push("Max outbound queue cannot be 0".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("duplex-net"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// `ip:port` or `hostname:port`, the forms `tokio::net::TcpListener::bind` resolves.
fn is_host_port(address: &str) -> bool {
    if address.parse::<std::net::SocketAddr>().is_ok() {
        return true;
    }
    match address.rsplit_once(':') {
        Some((host, port)) => {
            !host.is_empty() && !host.contains(char::is_whitespace) && port.parse::<u16>().is_ok()
        }
        None => false,
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        level.as_str().to_lowercase().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
