//! # Error Types
//!
//! Custom error types for Flight Link using `thiserror`.

use thiserror::Error;

/// Main error type for Flight Link
#[derive(Debug, Error)]
pub enum FlightLinkError {
    /// Transport failure (open, write, close)
    #[error("Serial error: {0}")]
    Serial(String),

    /// None of the candidate devices could be opened
    #[error("No serial device found (tried: {0})")]
    SerialPortNotFound(String),

    /// MAVLink protocol errors (bad layout, oversize payload)
    #[error("MAVLink protocol error: {0}")]
    Protocol(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Intent requires an open session
    #[error("Not connected to vehicle")]
    NotConnected,

    /// Connect requested while a session is live
    #[error("Already connected")]
    AlreadyConnected,

    /// A parameter write is already awaiting its echo
    #[error("Another parameter write is in progress")]
    ParamWriteInProgress,

    /// No echo arrived after every attempt
    #[error("Parameter {name} was not confirmed after {attempts} attempts")]
    ParamWriteFailed { name: String, attempts: u32 },

    /// Name is not in the vehicle's reported catalog
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    /// The session actor has shut down
    #[error("Session closed")]
    SessionClosed,
}

/// Result type alias for Flight Link
pub type Result<T> = std::result::Result<T, FlightLinkError>;
