//! Configuration for the myStrom exporter.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use mystrom_common::LoggingConfig;

/// Paths served by the router itself; configurable paths must not shadow them.
const RESERVED_PATHS: &[&str] = &["/", "/health", "/discover"];

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] mystrom_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// HTTP endpoint settings.
    #[serde(default)]
    pub web: WebConfig,

    /// Device client settings.
    #[serde(default)]
    pub device: DeviceConfig,

    /// UDP discovery settings.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Address to listen on (default: ":9452", all interfaces).
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path under which the exporter's own metrics are exposed (default: "/metrics").
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,

    /// Path under which device metrics are fetched (default: "/device").
    #[serde(default = "default_device_path")]
    pub device_path: String,
}

fn default_listen() -> String {
    ":9452".to_string()
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_device_path() -> String {
    "/device".to_string()
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            metrics_path: default_metrics_path(),
            device_path: default_device_path(),
        }
    }
}

impl WebConfig {
    /// Resolve the listen address. A bare `:port` binds all interfaces.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_listen_address(&self.listen)
    }
}

/// Parse a listen address, accepting the `:port` shorthand for `0.0.0.0:port`.
pub fn parse_listen_address(listen: &str) -> Result<SocketAddr, ConfigError> {
    let normalized = if listen.starts_with(':') {
        format!("0.0.0.0{}", listen)
    } else {
        listen.to_string()
    };

    normalized
        .parse()
        .map_err(|_| ConfigError::Validation(format!("Invalid listen address: {}", listen)))
}

/// Device client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Total timeout of one device request in seconds (default: 5).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    5
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
        }
    }
}

impl DeviceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// UDP discovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Enable the discovery listener and its HTTP routes.
    #[serde(default)]
    pub enabled: bool,

    /// UDP address the broadcast listener binds (default: "0.0.0.0:7979").
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Capacity of the queue between the receiver and the device table.
    ///
    /// When full, the receiver waits for the table to drain it.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Address published as the scrape target in discovery manifests.
    ///
    /// Defaults to the listen address, with an unspecified host replaced by
    /// the preferred outbound address of this machine.
    #[serde(default)]
    pub advertise_address: Option<String>,

    /// Forget devices not heard from for this many seconds (default: never).
    #[serde(default)]
    pub stale_timeout_secs: Option<u64>,

    /// How often to sweep stale devices (seconds).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_bind() -> String {
    "0.0.0.0:7979".to_string()
}

fn default_queue_capacity() -> usize {
    10
}

fn default_sweep_interval() -> u64 {
    60 // 1 minute
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_bind(),
            queue_capacity: default_queue_capacity(),
            advertise_address: None,
            stale_timeout_secs: None,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl DiscoveryConfig {
    pub fn stale_timeout(&self) -> Option<Duration> {
        self.stale_timeout_secs.map(Duration::from_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: ExporterConfig = mystrom_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = mystrom_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.web.listen_addr()?;

        for (name, path) in [
            ("Metrics path", &self.web.metrics_path),
            ("Device path", &self.web.device_path),
        ] {
            if !path.starts_with('/') {
                return Err(ConfigError::Validation(format!(
                    "{} must start with /",
                    name
                )));
            }
            if RESERVED_PATHS.contains(&path.as_str()) || path.starts_with("/device_by_mac/") {
                return Err(ConfigError::Validation(format!(
                    "{} {} conflicts with a built-in route",
                    name, path
                )));
            }
        }

        if self.web.metrics_path == self.web.device_path {
            return Err(ConfigError::Validation(
                "Metrics path and device path must differ".to_string(),
            ));
        }

        if self.device.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "timeout_secs must be > 0".to_string(),
            ));
        }

        if self.discovery.bind.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid discovery bind address: {}",
                self.discovery.bind
            )));
        }

        if self.discovery.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "queue_capacity must be > 0".to_string(),
            ));
        }

        if self.discovery.stale_timeout_secs == Some(0) {
            return Err(ConfigError::Validation(
                "stale_timeout_secs must be > 0 when set".to_string(),
            ));
        }

        if self.discovery.sweep_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "sweep_interval_secs must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
