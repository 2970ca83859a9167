//! Configuration for the quadlink daemon
//!
//! Loaded from a TOML file. Every section has defaults, so a partial file
//! (or no file at all) is valid.

use crate::error::{Error, Result};
use crate::transport::{ClientConfig, ServerConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which end of the link the daemon runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Controller side: TCP server streaming telemetry, answering commands
    #[default]
    Robot,
    /// Operator side: reconnecting client receiving and archiving telemetry
    Monitor,
}

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub mode: Mode,
    pub network: NetworkConfig,
    pub liveness: LivenessConfig,
    pub storage: StorageConfig,
    pub robot: RobotConfig,
    pub monitor: MonitorConfig,
    pub logging: LoggingConfig,
}

/// Socket addresses and framing limits
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Listen address in robot mode
    pub bind_address: String,
    /// Robot address dialed in monitor mode
    pub server_address: String,
    /// Largest accepted frame payload in bytes
    pub max_frame_len: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8006".to_string(),
            server_address: "127.0.0.1:8006".to_string(),
            max_frame_len: crate::transport::DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Heartbeat and reconnect timing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Server liveness task period
    pub server_detect_interval_ms: u64,
    /// Server drops a peer silent for longer than this
    pub server_timeout_ms: u64,
    /// Client restarts the link when silent for longer than this
    pub client_timeout_ms: u64,
    /// Per-attempt connect timeout
    pub connect_timeout_ms: u64,
    /// Pause between failed connect attempts
    pub retry_delay_ms: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            server_detect_interval_ms: 1000,
            server_timeout_ms: 5000,
            client_timeout_ms: 3000,
            connect_timeout_ms: 1000,
            retry_delay_ms: 1000,
        }
    }
}

/// Where logs and parameter files live, and buffer sizes
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for per-field sensor logs
    pub log_dir: PathBuf,
    /// Directory for parameter files
    pub param_dir: PathBuf,
    /// Rows buffered per field before flushing to the log
    pub archive_capacity: usize,
    /// Rows kept in the rolling display window
    pub display_capacity: usize,
    /// Rows averaged by the display filter
    pub filter_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("log"),
            param_dir: PathBuf::from("para"),
            archive_capacity: 500,
            display_capacity: 25,
            filter_size: 5,
        }
    }
}

/// Robot-mode loop timing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RobotConfig {
    /// Period between synthetic telemetry frames
    pub telemetry_interval_ms: u64,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            telemetry_interval_ms: 20,
        }
    }
}

/// Monitor-mode loop timing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Foreground poll period
    pub poll_interval_ms: u64,
    /// Feed the display window every N received frames
    pub display_every: u64,
    /// Period of the connection-state check
    pub status_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 40,
            display_every: 5,
            status_interval_ms: 1000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error); RUST_LOG wins
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from TOML file
    ///
    /// # Example
    /// ```no_run
    /// use quadlink::config::AppConfig;
    ///
    /// let config = AppConfig::from_file("quadlink.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Reject values the transport or archive cannot work with
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("liveness.server_detect_interval_ms", self.liveness.server_detect_interval_ms),
            ("liveness.server_timeout_ms", self.liveness.server_timeout_ms),
            ("liveness.client_timeout_ms", self.liveness.client_timeout_ms),
            ("liveness.connect_timeout_ms", self.liveness.connect_timeout_ms),
            ("storage.archive_capacity", self.storage.archive_capacity as u64),
            ("storage.display_capacity", self.storage.display_capacity as u64),
            ("storage.filter_size", self.storage.filter_size as u64),
            ("monitor.display_every", self.monitor.display_every),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than zero", name)));
            }
        }
        if self.network.max_frame_len == 0 || self.network.max_frame_len > u32::MAX as usize {
            return Err(Error::Config(format!(
                "network.max_frame_len out of range: {}",
                self.network.max_frame_len
            )));
        }
        Ok(())
    }

    /// Transport settings for robot mode
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_address: self.network.bind_address.clone(),
            detect_interval: Duration::from_millis(self.liveness.server_detect_interval_ms),
            timeout: Duration::from_millis(self.liveness.server_timeout_ms),
            max_frame_len: self.network.max_frame_len,
        }
    }

    /// Transport settings for monitor mode
    pub fn client_config(&self) -> ClientConfig {
        let timeout = Duration::from_millis(self.liveness.client_timeout_ms);
        ClientConfig {
            server_address: self.network.server_address.clone(),
            timeout,
            detect_interval: timeout / 3,
            connect_timeout: Duration::from_millis(self.liveness.connect_timeout_ms),
            retry_delay: Duration::from_millis(self.liveness.retry_delay_ms),
            max_frame_len: self.network.max_frame_len,
        }
    }
}
