//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every protocol timing is configurable. The defaults are field-tuned values
//! for ArduPilot over USB/telemetry radios, not derived limits.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{FlightLinkError, Result};
use crate::mavlink::protocol::{GCS_COMPONENT_ID, GCS_SYSTEM_ID, MAV_AUTOPILOT_ARDUPILOTMEGA};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub streams: StreamConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

/// Link identity configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    /// Our system id
    #[serde(default = "default_system_id")]
    pub system_id: u8,

    /// Our component id
    #[serde(default = "default_component_id")]
    pub component_id: u8,

    /// MAV_AUTOPILOT value a heartbeat must carry to be accepted as the vehicle
    #[serde(default = "default_target_autopilot")]
    pub target_autopilot: u8,
}

/// Protocol timing configuration (milliseconds unless noted)
#[derive(Debug, Deserialize, Clone)]
pub struct TimingConfig {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    #[serde(default = "default_param_settle_ms")]
    pub param_settle_ms: u64,

    #[serde(default = "default_param_retry_spacing_ms")]
    pub param_retry_spacing_ms: u64,

    #[serde(default = "default_param_retry_grace_ms")]
    pub param_retry_grace_ms: u64,

    /// Individual re-requests per missing index
    #[serde(default = "default_param_max_retries")]
    pub param_max_retries: u32,

    #[serde(default = "default_param_write_timeout_ms")]
    pub param_write_timeout_ms: u64,

    #[serde(default = "default_param_write_attempts")]
    pub param_write_attempts: u32,

    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Wait for the final ack of an interactive calibration
    #[serde(default = "default_calibration_timeout_ms")]
    pub calibration_timeout_ms: u64,

    #[serde(default = "default_post_connect_step_ms")]
    pub post_connect_step_ms: u64,

    #[serde(default = "default_stream_step_ms")]
    pub stream_step_ms: u64,

    #[serde(default = "default_stream_grace_ms")]
    pub stream_grace_ms: u64,

    #[serde(default = "default_stream_retry_interval_ms")]
    pub stream_retry_interval_ms: u64,

    #[serde(default = "default_stream_max_attempts")]
    pub stream_max_attempts: u32,

    /// Longest a single frame may take to drain into the link
    #[serde(default = "default_link_write_timeout_ms")]
    pub link_write_timeout_ms: u64,
}

/// Telemetry stream configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    /// Requested rate for every stream, Hz
    #[serde(default = "default_stream_rate_hz")]
    pub rate_hz: u16,

    /// Emit the auto-backup hook after connecting
    #[serde(default)]
    pub auto_backup: bool,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for rolling log files; console only when unset
    #[serde(default)]
    pub log_dir: Option<String>,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyACM0".to_string() }
fn default_baud_rate() -> u32 { 57600 }
fn default_read_buffer_size() -> usize { 1024 }

fn default_system_id() -> u8 { GCS_SYSTEM_ID }
fn default_component_id() -> u8 { GCS_COMPONENT_ID }
fn default_target_autopilot() -> u8 { MAV_AUTOPILOT_ARDUPILOTMEGA }

fn default_heartbeat_interval_ms() -> u64 { 1000 }
fn default_connect_timeout_ms() -> u64 { 10_000 }
fn default_heartbeat_timeout_ms() -> u64 { 5000 }
fn default_param_settle_ms() -> u64 { 1500 }
fn default_param_retry_spacing_ms() -> u64 { 20 }
fn default_param_retry_grace_ms() -> u64 { 1000 }
fn default_param_max_retries() -> u32 { 3 }
fn default_param_write_timeout_ms() -> u64 { 1500 }
fn default_param_write_attempts() -> u32 { 3 }
fn default_command_timeout_ms() -> u64 { 3000 }
fn default_calibration_timeout_ms() -> u64 { 120_000 }
fn default_post_connect_step_ms() -> u64 { 500 }
fn default_stream_step_ms() -> u64 { 100 }
fn default_stream_grace_ms() -> u64 { 3000 }
fn default_stream_retry_interval_ms() -> u64 { 3000 }
fn default_stream_max_attempts() -> u32 { 3 }
fn default_link_write_timeout_ms() -> u64 { 2000 }

fn default_stream_rate_hz() -> u16 { 4 }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            system_id: default_system_id(),
            component_id: default_component_id(),
            target_autopilot: default_target_autopilot(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            param_settle_ms: default_param_settle_ms(),
            param_retry_spacing_ms: default_param_retry_spacing_ms(),
            param_retry_grace_ms: default_param_retry_grace_ms(),
            param_max_retries: default_param_max_retries(),
            param_write_timeout_ms: default_param_write_timeout_ms(),
            param_write_attempts: default_param_write_attempts(),
            command_timeout_ms: default_command_timeout_ms(),
            calibration_timeout_ms: default_calibration_timeout_ms(),
            post_connect_step_ms: default_post_connect_step_ms(),
            stream_step_ms: default_stream_step_ms(),
            stream_grace_ms: default_stream_grace_ms(),
            stream_retry_interval_ms: default_stream_retry_interval_ms(),
            stream_max_attempts: default_stream_max_attempts(),
            link_write_timeout_ms: default_link_write_timeout_ms(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            rate_hz: default_stream_rate_hz(),
            auto_backup: false,
        }
    }
}

impl TimingConfig {
    pub fn heartbeat_interval(&self) -> Duration { Duration::from_millis(self.heartbeat_interval_ms) }
    pub fn connect_timeout(&self) -> Duration { Duration::from_millis(self.connect_timeout_ms) }
    pub fn heartbeat_timeout(&self) -> Duration { Duration::from_millis(self.heartbeat_timeout_ms) }
    pub fn param_settle(&self) -> Duration { Duration::from_millis(self.param_settle_ms) }
    pub fn param_retry_spacing(&self) -> Duration { Duration::from_millis(self.param_retry_spacing_ms) }
    pub fn param_retry_grace(&self) -> Duration { Duration::from_millis(self.param_retry_grace_ms) }
    pub fn param_write_timeout(&self) -> Duration { Duration::from_millis(self.param_write_timeout_ms) }
    pub fn command_timeout(&self) -> Duration { Duration::from_millis(self.command_timeout_ms) }
    pub fn calibration_timeout(&self) -> Duration { Duration::from_millis(self.calibration_timeout_ms) }
    pub fn post_connect_step(&self) -> Duration { Duration::from_millis(self.post_connect_step_ms) }
    pub fn stream_step(&self) -> Duration { Duration::from_millis(self.stream_step_ms) }
    pub fn stream_grace(&self) -> Duration { Duration::from_millis(self.stream_grace_ms) }
    pub fn stream_retry_interval(&self) -> Duration { Duration::from_millis(self.stream_retry_interval_ms) }
    pub fn link_write_timeout(&self) -> Duration { Duration::from_millis(self.link_write_timeout_ms) }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use flight_link::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if ![9600, 19200, 38400, 57600, 115200, 230400, 460800, 500000, 921600, 1500000]
            .contains(&self.serial.baud_rate)
        {
            return Err(invalid(
                "baud_rate must be one of: 9600, 19200, 38400, 57600, 115200, 230400, 460800, 500000, 921600, 1500000",
            ));
        }

        if self.serial.read_buffer_size < 64 || self.serial.read_buffer_size > 65536 {
            return Err(invalid("read_buffer_size must be between 64 and 65536"));
        }

        if self.link.system_id == 0 {
            return Err(invalid("system_id must be between 1 and 255"));
        }

        let t = &self.timing;
        for (name, value, max) in [
            ("heartbeat_interval_ms", t.heartbeat_interval_ms, 10_000),
            ("connect_timeout_ms", t.connect_timeout_ms, 120_000),
            ("heartbeat_timeout_ms", t.heartbeat_timeout_ms, 60_000),
            ("param_settle_ms", t.param_settle_ms, 60_000),
            ("param_retry_spacing_ms", t.param_retry_spacing_ms, 10_000),
            ("param_retry_grace_ms", t.param_retry_grace_ms, 60_000),
            ("param_write_timeout_ms", t.param_write_timeout_ms, 60_000),
            ("command_timeout_ms", t.command_timeout_ms, 60_000),
            ("calibration_timeout_ms", t.calibration_timeout_ms, 600_000),
            ("post_connect_step_ms", t.post_connect_step_ms, 60_000),
            ("stream_step_ms", t.stream_step_ms, 10_000),
            ("stream_grace_ms", t.stream_grace_ms, 60_000),
            ("stream_retry_interval_ms", t.stream_retry_interval_ms, 60_000),
            ("link_write_timeout_ms", t.link_write_timeout_ms, 60_000),
        ] {
            if value == 0 || value > max {
                return Err(invalid(&format!("{} must be between 1 and {}", name, max)));
            }
        }

        if t.heartbeat_timeout_ms <= t.heartbeat_interval_ms {
            return Err(invalid("heartbeat_timeout_ms must be longer than heartbeat_interval_ms"));
        }

        if t.param_max_retries == 0 || t.param_max_retries > 20 {
            return Err(invalid("param_max_retries must be between 1 and 20"));
        }

        if t.param_write_attempts == 0 || t.param_write_attempts > 10 {
            return Err(invalid("param_write_attempts must be between 1 and 10"));
        }

        if t.stream_max_attempts > 20 {
            return Err(invalid("stream_max_attempts must be between 0 and 20"));
        }

        if self.streams.rate_hz == 0 || self.streams.rate_hz > 50 {
            return Err(invalid("rate_hz must be between 1 and 50"));
        }

        if matches!(&self.logging.log_dir, Some(dir) if dir.is_empty()) {
            return Err(invalid("log_dir cannot be empty when set"));
        }

        Ok(())
    }
}

fn invalid(msg: &str) -> FlightLinkError {
    FlightLinkError::Config(toml::de::Error::custom(msg))
}
