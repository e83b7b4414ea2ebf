//! # Session Module
//!
//! The connection to one vehicle, run as a single actor task.
//!
//! The actor owns the link, the decoder and encoder, every protocol timer and
//! all pending callbacks. Callers hold a cloneable [`SessionHandle`] that sends
//! intents over a channel and observes the vehicle through:
//! - a `watch` channel carrying the latest [`VehicleSnapshot`]
//! - a `broadcast` channel of [`SessionEvent`]s
//!
//! ## Lifecycle
//!
//! ```text
//! Disconnected --connect--> Connecting --target heartbeat--> Loading
//!      ^                                                        |
//!      |                                            params downloaded
//!      +--- disconnect / watchdog / link error --- Connected <--+
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use flight_link::config::Config;
//! use flight_link::serial::SerialConnector;
//! use flight_link::session::{self, SessionPhase};
//!
//! # async fn run() -> flight_link::error::Result<()> {
//! let config = Config::default();
//! let connector = Arc::new(SerialConnector::from_config(&config.serial));
//! let session = session::spawn(config, connector);
//!
//! session.connect().await?;
//! session.wait_for_phase(SessionPhase::Connected).await?;
//! let echoed = session.write_param("ARMING_CHECK", 1.0).await?;
//! # Ok(())
//! # }
//! ```

mod engine;
pub mod streams;
pub mod timers;
mod writer;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::calibration::{self, CalibrationKind, CompassProgress, CompassReport};
use crate::command::{AckResponder, CommandReply};
use crate::config::{Config, TimingConfig};
use crate::error::{FlightLinkError, Result};
use crate::mavlink::protocol::mav_cmd;
use crate::mavlink::MavResult;
use crate::params::write::WriteResponder;
use crate::params::{SyncSummary, WriteSummary};
use crate::serial::Connector;
use crate::telemetry::{FirmwareInfo, VehicleIdentity, VehicleSnapshot};

use engine::Engine;

/// Intents queued ahead of the actor
const INTENT_QUEUE_DEPTH: usize = 32;

/// Events buffered per slow subscriber before it starts lagging
const EVENT_QUEUE_DEPTH: usize = 256;

/// Connection phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum SessionPhase {
    /// No link open
    #[default]
    Disconnected,
    /// Link open, waiting for the vehicle's heartbeat
    Connecting,
    /// Vehicle identified, downloading parameters
    Loading,
    /// Parameters loaded; fully operational
    Connected,
}

/// Notifications for observers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    PhaseChanged {
        phase: SessionPhase,
    },
    /// Session ended; the reason is also kept in the snapshot
    Disconnected {
        reason: String,
    },
    VehicleDetected {
        identity: VehicleIdentity,
    },
    /// A new parameter index arrived during download
    ParamProgress {
        received: usize,
        total: usize,
    },
    ParamsLoaded {
        summary: SyncSummary,
    },
    /// Value changed after the download (write echoes, vehicle-side changes)
    ParamUpdated {
        name: String,
        value: f32,
    },
    StatusText {
        severity: u8,
        text: String,
        timestamp: DateTime<Utc>,
    },
    /// Every ack from the vehicle, awaited or not
    CommandAck {
        command: u16,
        result: MavResult,
    },
    FirmwareDetected {
        firmware: FirmwareInfo,
    },
    CompassProgress {
        progress: CompassProgress,
    },
    CompassReport {
        report: CompassReport,
    },
    /// Telemetry never started despite every activation attempt
    StreamActivationAbandoned {
        attempts: u32,
    },
    /// Parameters are loaded and auto-backup is enabled
    AutoBackupRequested {
        param_count: usize,
    },
}

/// A `COMMAND_LONG` to send
#[derive(Debug, Clone, Copy)]
pub(crate) struct CommandRequest {
    pub command: u16,
    pub params: [f32; 7],
    pub timeout: Duration,
    /// Marks the start of a calibration run
    pub calibration: Option<CalibrationKind>,
}

/// Messages from handles to the actor
#[derive(Debug)]
pub(crate) enum Intent {
    Connect {
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<Result<()>>,
    },
    WriteParam {
        name: String,
        value: f32,
        reply: WriteResponder,
    },
    Command {
        request: CommandRequest,
        /// `None` for fire-and-forget
        responder: Option<AckResponder>,
        reply: oneshot::Sender<Result<()>>,
    },
    ConfirmAccelPosition {
        reply: oneshot::Sender<Result<()>>,
    },
    CancelCalibration {
        reply: oneshot::Sender<Result<()>>,
    },
    RequestDataStream {
        stream_id: u8,
        rate_hz: u16,
        start: bool,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Start a session actor on the current tokio runtime
///
/// The actor stays disconnected until [`SessionHandle::connect`]. It stops
/// once every handle has been dropped.
///
/// # Arguments
///
/// * `config` - Link identity, timings and stream settings
/// * `connector` - Opens the transport on each connect
pub fn spawn(config: Config, connector: Arc<dyn Connector>) -> SessionHandle {
    let (intent_tx, intent_rx) = mpsc::channel(INTENT_QUEUE_DEPTH);
    let (event_tx, _) = broadcast::channel(EVENT_QUEUE_DEPTH);
    let (snapshot_tx, snapshot_rx) = watch::channel(VehicleSnapshot::default());

    let timing = config.timing.clone();
    let engine = Engine::new(config, connector, intent_rx, event_tx.clone(), snapshot_tx);
    tokio::spawn(engine.run());

    SessionHandle {
        intents: intent_tx,
        events: event_tx,
        snapshot: snapshot_rx,
        timing,
    }
}

/// Cloneable front end to a session actor
#[derive(Debug, Clone)]
pub struct SessionHandle {
    intents: mpsc::Sender<Intent>,
    events: broadcast::Sender<SessionEvent>,
    snapshot: watch::Receiver<VehicleSnapshot>,
    timing: TimingConfig,
}

impl SessionHandle {
    /// Open the link and start the handshake
    ///
    /// Returns once the transport is open; watch the phase for progress.
    ///
    /// # Errors
    ///
    /// - `AlreadyConnected` if a session is live
    /// - transport errors from the connector
    pub async fn connect(&self) -> Result<()> {
        self.request(|reply| Intent::Connect { reply }).await
    }

    /// Close the link, cancelling every timer and pending callback
    pub async fn disconnect(&self) -> Result<()> {
        self.request(|reply| Intent::Disconnect { reply }).await
    }

    /// Copy of the latest snapshot
    pub fn snapshot(&self) -> VehicleSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.snapshot.borrow().phase
    }

    /// Receiver notified on every snapshot change
    pub fn watch(&self) -> watch::Receiver<VehicleSnapshot> {
        self.snapshot.clone()
    }

    /// Subscribe to events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Resolve once the session reaches `phase`
    pub async fn wait_for_phase(&self, phase: SessionPhase) -> Result<()> {
        let mut rx = self.snapshot.clone();
        rx.wait_for(|snapshot| snapshot.phase == phase)
            .await
            .map(|_| ())
            .map_err(|_| FlightLinkError::SessionClosed)
    }

    /// Write one parameter and wait for the vehicle's echo
    ///
    /// # Returns
    ///
    /// The value the vehicle echoed back, which may differ from `value`.
    ///
    /// # Errors
    ///
    /// - `NotConnected` before parameters are loaded
    /// - `ParamWriteInProgress` while another write awaits its echo
    /// - `UnknownParameter` if the vehicle never reported `name`
    /// - `ParamWriteFailed` when no echo arrived after every attempt
    pub async fn write_param(&self, name: &str, value: f32) -> Result<f32> {
        let name = name.to_string();
        self.request(|reply| Intent::WriteParam { name, value, reply }).await
    }

    /// Write every entry of `dirty` in turn
    ///
    /// Names missing from the vehicle's catalog are skipped without being sent.
    pub async fn write_all_dirty(&self, dirty: &BTreeMap<String, f32>) -> Result<WriteSummary> {
        let mut summary = WriteSummary::default();

        for (name, value) in dirty {
            let known = self.snapshot.borrow().params.contains(name);
            if !known {
                summary.skipped += 1;
                continue;
            }

            match self.write_param(name, *value).await {
                Ok(_) => summary.success += 1,
                Err(FlightLinkError::ParamWriteFailed { .. }) | Err(FlightLinkError::UnknownParameter(_)) => {
                    summary.failed += 1
                }
                Err(e) => return Err(e),
            }
        }

        Ok(summary)
    }

    /// Send a command and wait for its ack (default timeout)
    pub async fn send_command(&self, command: u16, params: [f32; 7]) -> Result<CommandReply> {
        self.send_command_with_timeout(command, params, self.timing.command_timeout()).await
    }

    /// Send a command and wait up to `timeout` for its ack
    pub async fn send_command_with_timeout(
        &self,
        command: u16,
        params: [f32; 7],
        timeout: Duration,
    ) -> Result<CommandReply> {
        self.command(CommandRequest {
            command,
            params,
            timeout,
            calibration: None,
        })
        .await
    }

    /// Send a command without registering for its ack
    pub async fn send_command_no_ack(&self, command: u16, params: [f32; 7]) -> Result<()> {
        let request = CommandRequest {
            command,
            params,
            timeout: self.timing.command_timeout(),
            calibration: None,
        };
        self.request(|reply| Intent::Command {
            request,
            responder: None,
            reply,
        })
        .await
    }

    /// Start the 6-position accelerometer calibration
    ///
    /// Resolves with the ack of the start command, which the vehicle sends
    /// when the whole run ends. Confirm each position with
    /// [`confirm_accel_position`](Self::confirm_accel_position) from another
    /// clone of the handle.
    pub async fn start_accel_calibration(&self) -> Result<CommandReply> {
        self.start_calibration(CalibrationKind::Accelerometer)
            .await
    }

    /// Tell the vehicle the airframe is in the requested position
    pub async fn confirm_accel_position(&self) -> Result<()> {
        self.request(|reply| Intent::ConfirmAccelPosition { reply }).await
    }

    /// Level-trim calibration
    pub async fn start_level_calibration(&self) -> Result<CommandReply> {
        self.start_calibration(CalibrationKind::LevelTrim)
            .await
    }

    /// Start onboard compass calibration
    ///
    /// Progress and reports arrive as events.
    pub async fn start_compass_calibration(&self) -> Result<CommandReply> {
        self.start_calibration(CalibrationKind::Compass)
            .await
    }

    /// Accept compass calibration results
    pub async fn accept_compass_calibration(&self) -> Result<CommandReply> {
        let (command, params) = calibration::compass_accept_command();
        self.send_command(command, params).await
    }

    /// Abandon the running calibration, if any
    pub async fn cancel_calibration(&self) -> Result<()> {
        self.request(|reply| Intent::CancelCalibration { reply }).await
    }

    /// Ask for a legacy data stream at `rate_hz`
    pub async fn request_data_stream(&self, stream_id: u8, rate_hz: u16, start: bool) -> Result<()> {
        self.request(|reply| Intent::RequestDataStream {
            stream_id,
            rate_hz,
            start,
            reply,
        })
        .await
    }

    /// Spin one motor at `throttle_pct` for `duration_s` seconds
    pub async fn test_motor(&self, motor: u8, throttle_pct: f32, duration_s: f32) -> Result<CommandReply> {
        let (command, params) = calibration::motor_test_command(motor, throttle_pct, duration_s);
        self.send_command(command, params).await
    }

    /// Reboot the autopilot
    pub async fn reboot(&self) -> Result<CommandReply> {
        self.send_command(mav_cmd::PREFLIGHT_REBOOT_SHUTDOWN, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
            .await
    }

    /// Arm or disarm
    pub async fn arm(&self, arm: bool) -> Result<CommandReply> {
        let param1 = if arm { 1.0 } else { 0.0 };
        self.send_command(mav_cmd::COMPONENT_ARM_DISARM, [param1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
            .await
    }

    async fn start_calibration(&self, kind: CalibrationKind) -> Result<CommandReply> {
        let (command, params) = calibration::start_command(kind);
        let timeout = if kind.is_interactive() {
            self.timing.calibration_timeout()
        } else {
            self.timing.command_timeout()
        };
        self.command(CommandRequest {
            command,
            params,
            timeout,
            calibration: Some(kind),
        })
        .await
    }

    async fn command(&self, request: CommandRequest) -> Result<CommandReply> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.request(|reply| Intent::Command {
            request,
            responder: Some(ack_tx),
            reply,
        })
        .await?;

        // A dropped responder means the registration was discarded
        Ok(ack_rx.await.unwrap_or(CommandReply::Cancelled))
    }

    async fn request<T, F>(&self, make: F) -> Result<T>
    where
        F: FnOnce(oneshot::Sender<Result<T>>) -> Intent,
    {
        let (tx, rx) = oneshot::channel();
        self.intents
            .send(make(tx))
            .await
            .map_err(|_| FlightLinkError::SessionClosed)?;
        rx.await.map_err(|_| FlightLinkError::SessionClosed)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::port_trait::MockConnector;
    use crate::serial::BoxedLink;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_connect_reports_open_failure() {
        let mut connector = MockConnector::new();
        connector
            .expect_open()
            .times(1)
            .returning(|| Err(FlightLinkError::SerialPortNotFound("/dev/ttyACM0".into())));

        let session = spawn(Config::default(), Arc::new(connector));
        let result = session.connect().await;

        assert!(matches!(result, Err(FlightLinkError::SerialPortNotFound(_))));
        assert_eq!(session.phase(), SessionPhase::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_enters_connecting() {
        let peers = Arc::new(Mutex::new(Vec::new()));
        let held = peers.clone();

        let mut connector = MockConnector::new();
        connector.expect_open().times(1).returning(move || {
            let (ours, theirs) = tokio::io::duplex(1024);
            held.lock().unwrap().push(theirs);
            Ok(Box::new(ours) as BoxedLink)
        });
        connector.expect_describe().returning(|| "mock".to_string());

        let session = spawn(Config::default(), Arc::new(connector));
        session.connect().await.unwrap();
        assert_eq!(session.phase(), SessionPhase::Connecting);

        assert!(matches!(session.connect().await, Err(FlightLinkError::AlreadyConnected)));
        session.disconnect().await.unwrap();
        assert_eq!(session.phase(), SessionPhase::Disconnected);
        assert_eq!(peers.lock().unwrap().len(), 1);
    }
}
