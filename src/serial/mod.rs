//! # Serial Communication Module
//!
//! Handles the serial link to the flight controller.
//!
//! This module handles:
//! - Opening the serial port (8N1, no flow control) at the configured baud
//! - Exposing the port as a [`Link`] the session owns for its lifetime
//! - Trying fallback device paths in order

pub mod port_trait;

pub use port_trait::{BoxedLink, Connector, Link, PreopenedConnector};

use async_trait::async_trait;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::config::SerialConfig;
use crate::error::{FlightLinkError, Result};

/// Serial port connector for the flight controller
///
/// Each [`open`](Connector::open) tries the device paths in order and keeps
/// the first that opens.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    paths: Vec<String>,
    baud_rate: u32,
}

impl SerialConnector {
    /// Connector for a single device path
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use flight_link::serial::SerialConnector;
    ///
    /// let connector = SerialConnector::new("/dev/ttyACM0", 115200);
    /// ```
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            paths: vec![path.into()],
            baud_rate,
        }
    }

    /// Connector trying several device paths in order of preference
    pub fn with_paths(paths: &[&str], baud_rate: u32) -> Self {
        Self {
            paths: paths.iter().map(|p| p.to_string()).collect(),
            baud_rate,
        }
    }

    /// Connector from the `[serial]` configuration section
    pub fn from_config(config: &SerialConfig) -> Self {
        Self::new(config.port.clone(), config.baud_rate)
    }

    /// Configured baud rate
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Open a specific serial port with MAVLink settings
    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| FlightLinkError::Serial(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn open(&self) -> Result<BoxedLink> {
        for path in &self.paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, self.baud_rate) {
                Ok(port) => {
                    info!("Opened flight controller link at {} ({} baud)", path, self.baud_rate);
                    return Ok(Box::new(port));
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(FlightLinkError::SerialPortNotFound(self.paths.join(", ")))
    }

    fn describe(&self) -> String {
        self.paths.join("|")
    }
}
