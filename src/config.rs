//! Gateway configuration.
//!
//! Loaded from a YAML file:
//!
//! ```yaml
//! interfaces:
//!   - device: /dev/ttyUSB0
//!     baud_rate: 115200
//!     read_timeout_ms: 1000
//! heartbeat_interval_secs: 10
//! rescue_interval_secs: 10
//! log_port: true
//! ```

use nocan_serial::device::{DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT};
use nocan_serial::SerialOpener;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_HEARTBEAT_SECS: u64 = 10;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serial adapter settings (`interfaces[]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Serial device path.
    pub device: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Read timeout in milliseconds; bounds how long shutdown waits on a
    /// silent device.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_read_timeout_ms() -> u64 {
    DEFAULT_READ_TIMEOUT.as_millis() as u64
}

impl InterfaceConfig {
    pub fn new(device: impl Into<String>) -> Self {
        InterfaceConfig {
            device: device.into(),
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }

    pub fn opener(&self) -> SerialOpener {
        SerialOpener::new(self.device.clone())
            .baud_rate(self.baud_rate)
            .timeout(Duration::from_millis(self.read_timeout_ms))
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub interfaces: Vec<InterfaceConfig>,

    /// Seconds between two heartbeat signals to the links.
    pub heartbeat_interval_secs: u64,

    /// Seconds between two attempts to reopen a lost adapter.
    pub rescue_interval_secs: u64,

    /// Log every message received from the bus.
    pub log_port: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            interfaces: Vec::new(),
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_SECS,
            rescue_interval_secs: nocan::RESCUE_INTERVAL.as_secs(),
            log_port: false,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a single file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        serde_yaml::from_str(&contents).map_err(|e| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Add an interface unless one with the same device is configured.
    pub fn add_interface(&mut self, interface: InterfaceConfig) {
        if !self.interfaces.iter().any(|i| i.device == interface.device) {
            self.interfaces.push(interface);
        }
    }

    /// Check the values the gateway cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interfaces.is_empty() {
            return Err(ConfigError::Invalid("no interface configured".into()));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid("heartbeat interval must not be zero".into()));
        }
        if self.rescue_interval_secs == 0 {
            return Err(ConfigError::Invalid("rescue interval must not be zero".into()));
        }
        if let Some(interface) = self.interfaces.iter().find(|i| i.read_timeout_ms == 0) {
            return Err(ConfigError::Invalid(format!(
                "read timeout of {} must not be zero",
                interface.device
            )));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn rescue_interval(&self) -> Duration {
        Duration::from_secs(self.rescue_interval_secs)
    }
}
