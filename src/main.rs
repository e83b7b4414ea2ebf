//! # Flight Link
//!
//! Connect to a MAVLink flight controller and log what it reports.
//!
//! ```bash
//! flight-link [config.toml]
//! ```
//!
//! Session events are written as JSON lines through the logger.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use flight_link::config::{Config, LoggingConfig};
use flight_link::serial::SerialConnector;
use flight_link::session::{self, SessionEvent};

/// Configuration file used when none is given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Rolling log file prefix inside `log_dir`
const LOG_FILE_PREFIX: &str = "flight-link.log";

/// Main entry point for Flight Link
///
/// # Control Flow
///
/// 1. Load configuration (defaults when the default file is absent)
/// 2. Set up console logging, plus a daily rolling file when `log_dir` is set
/// 3. Spawn the session and connect
/// 4. Log every session event until Ctrl+C, then disconnect cleanly
///
/// # Errors
///
/// Returns error if:
/// - An explicitly named configuration file cannot be loaded
/// - The serial port cannot be opened
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1);
    let config = load_config(config_path.as_deref())?;

    let _log_guard = init_logging(&config.logging);

    info!("Flight Link v{} starting...", env!("CARGO_PKG_VERSION"));

    let connector = Arc::new(SerialConnector::from_config(&config.serial));
    let session = session::spawn(config, connector);
    let mut events = session.subscribe();

    session.connect().await.context("Failed to open vehicle link")?;
    info!("Waiting for vehicle heartbeat. Press Ctrl+C to exit");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    log_event(&event);
                    if let SessionEvent::Disconnected { reason } = &event {
                        warn!("Vehicle disconnected: {}", reason);
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => debug!("Event log skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            },

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                session.disconnect().await?;
                break;
            }
        }
    }

    let stats = session.snapshot().link;
    info!(
        "Link statistics: {} v1 frames, {} v2 frames, {} checksum failures, {} bytes",
        stats.v1_frames, stats.v2_frames, stats.checksum_failures, stats.bytes_processed
    );
    info!("Flight Link stopped");

    Ok(())
}

/// Load the named file, or the default file when present, or built-in defaults
fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path).with_context(|| format!("Failed to load {}", path)),
        None if std::path::Path::new(DEFAULT_CONFIG_PATH).exists() => {
            Config::load(DEFAULT_CONFIG_PATH).with_context(|| format!("Failed to load {}", DEFAULT_CONFIG_PATH))
        }
        None => Ok(Config::default()),
    }
}

/// Install the tracing subscriber
///
/// The returned guard flushes the file writer on drop and must live until exit.
fn init_logging(config: &LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    guard
}

/// Log one event as a JSON line
fn log_event(event: &SessionEvent) {
    match serde_json::to_string(event) {
        Ok(line) => match event {
            SessionEvent::ParamProgress { .. } => debug!(target: "flight_link::events", "{}", line),
            _ => info!(target: "flight_link::events", "{}", line),
        },
        Err(e) => warn!("Failed to serialize event: {}", e),
    }
}
