//! # Calibration Module
//!
//! Sensor calibration flows layered on the command/ack channel.
//!
//! ## Accelerometer (6-position)
//!
//! The start command puts the vehicle into an interactive loop. The vehicle
//! names each required orientation in `STATUSTEXT` lines; the operator
//! positions the airframe and confirms with [`accel_confirm_ack`], a
//! `COMMAND_ACK` for command 0 that the vehicle's loop waits on. The overall
//! result arrives as the ack of the original start command.
//!
//! ## Level trim
//!
//! A single command with an ordinary ack.
//!
//! ## Compass
//!
//! Start, then per-compass `MAG_CAL_PROGRESS` and a final `MAG_CAL_REPORT`
//! per compass. Results may be accepted or the run cancelled.
//!
//! ## Usage
//!
//! ```
//! use flight_link::calibration::{CalibrationKind, start_command};
//! use flight_link::mavlink::protocol::mav_cmd;
//!
//! let (command, params) = start_command(CalibrationKind::Accelerometer);
//! assert_eq!(command, mav_cmd::PREFLIGHT_CALIBRATION);
//! assert_eq!(params[4], 1.0);
//! ```

use serde::Serialize;

use crate::mavlink::messages::{CommandAck, MagCalProgress, MagCalReport};
use crate::mavlink::protocol::mav_cmd;

/// MAV_RESULT the accelerometer loop expects in a position confirmation
const ACCELCAL_CONFIRM_RESULT: u8 = 1;

/// Which calibration a start intent begins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CalibrationKind {
    /// Interactive 6-position accelerometer calibration
    Accelerometer,
    /// Single-position level trim
    LevelTrim,
    /// Onboard compass calibration
    Compass,
}

impl CalibrationKind {
    /// Whether the start command's ack only arrives when the whole run ends
    pub fn is_interactive(self) -> bool {
        matches!(self, CalibrationKind::Accelerometer)
    }
}

/// Command id and parameters that start a calibration
///
/// # Arguments
///
/// * `kind` - Calibration to start
///
/// # Returns
///
/// `(command, params)` ready for `COMMAND_LONG`
#[must_use]
pub fn start_command(kind: CalibrationKind) -> (u16, [f32; 7]) {
    match kind {
        CalibrationKind::Accelerometer => (mav_cmd::PREFLIGHT_CALIBRATION, [0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0]),
        CalibrationKind::LevelTrim => (mav_cmd::PREFLIGHT_CALIBRATION, [0.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0]),
        // All compasses, retry on failure, autosave, no delay, no autoreboot
        CalibrationKind::Compass => (mav_cmd::DO_START_MAG_CAL, [0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0]),
    }
}

/// Command that cancels a running calibration, if one exists for `kind`
///
/// Accelerometer and level runs have no cancel command; cancelling them only
/// abandons the wait on the start command's ack.
#[must_use]
pub fn cancel_command(kind: CalibrationKind) -> Option<(u16, [f32; 7])> {
    match kind {
        CalibrationKind::Compass => Some((mav_cmd::DO_CANCEL_MAG_CAL, [0.0; 7])),
        _ => None,
    }
}

/// Command that accepts compass results for all compasses
#[must_use]
pub fn compass_accept_command() -> (u16, [f32; 7]) {
    (mav_cmd::DO_ACCEPT_MAG_CAL, [0.0; 7])
}

/// Position confirmation for the accelerometer loop
#[must_use]
pub fn accel_confirm_ack() -> CommandAck {
    CommandAck::new(mav_cmd::ACCELCAL_CONFIRM, ACCELCAL_CONFIRM_RESULT)
}

/// Motor test: throttle percent for a duration, one motor
///
/// # Arguments
///
/// * `motor` - 1-based motor instance
/// * `throttle_pct` - Throttle, clamped to 0-100
/// * `duration_s` - Run time in seconds
#[must_use]
pub fn motor_test_command(motor: u8, throttle_pct: f32, duration_s: f32) -> (u16, [f32; 7]) {
    // param2 = 0: throttle type is percent
    (
        mav_cmd::DO_MOTOR_TEST,
        [motor as f32, 0.0, throttle_pct.clamp(0.0, 100.0), duration_s.max(0.0), 0.0, 0.0, 0.0],
    )
}

/// MAG_CAL_STATUS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MagCalStatus {
    NotStarted,
    WaitingToStart,
    RunningStepOne,
    RunningStepTwo,
    Success,
    Failed,
    BadOrientation,
    BadRadius,
    Other(u8),
}

impl From<u8> for MagCalStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => MagCalStatus::NotStarted,
            1 => MagCalStatus::WaitingToStart,
            2 => MagCalStatus::RunningStepOne,
            3 => MagCalStatus::RunningStepTwo,
            4 => MagCalStatus::Success,
            5 => MagCalStatus::Failed,
            6 => MagCalStatus::BadOrientation,
            7 => MagCalStatus::BadRadius,
            other => MagCalStatus::Other(other),
        }
    }
}

impl MagCalStatus {
    /// True once the compass will send no further progress
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            MagCalStatus::Success | MagCalStatus::Failed | MagCalStatus::BadOrientation | MagCalStatus::BadRadius
        )
    }
}

/// Per-compass progress update
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CompassProgress {
    pub compass_id: u8,
    pub completion_pct: u8,
    pub attempt: u8,
    pub status: MagCalStatus,
}

impl From<&MagCalProgress> for CompassProgress {
    fn from(msg: &MagCalProgress) -> Self {
        Self {
            compass_id: msg.compass_id,
            completion_pct: msg.completion_pct,
            attempt: msg.attempt,
            status: MagCalStatus::from(msg.cal_status),
        }
    }
}

/// Final per-compass result
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CompassReport {
    pub compass_id: u8,
    pub status: MagCalStatus,
    /// RMS milligauss; lower is better
    pub fitness: f32,
    pub offsets: [f32; 3],
    pub autosaved: bool,
}

impl From<&MagCalReport> for CompassReport {
    fn from(msg: &MagCalReport) -> Self {
        Self {
            compass_id: msg.compass_id,
            status: MagCalStatus::from(msg.cal_status),
            fitness: msg.fitness,
            offsets: msg.offsets,
            autosaved: msg.autosaved != 0,
        }
    }
}

/// Calibration currently running on the vehicle, as seen by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveCalibration {
    pub kind: CalibrationKind,
    /// Compasses still owing a final report (bit per compass id)
    outstanding: u8,
    mask_known: bool,
}

impl ActiveCalibration {
    pub fn new(kind: CalibrationKind) -> Self {
        Self {
            kind,
            outstanding: 0,
            mask_known: false,
        }
    }

    /// Learn which compasses take part from the first progress message
    pub fn on_progress(&mut self, msg: &MagCalProgress) {
        if !self.mask_known {
            self.outstanding = msg.cal_mask;
            self.mask_known = true;
        }
    }

    /// Record a final report; returns `true` when every compass has reported
    pub fn on_report(&mut self, msg: &MagCalReport) -> bool {
        if !self.mask_known {
            self.outstanding = msg.cal_mask;
            self.mask_known = true;
        }
        if msg.compass_id < 8 {
            self.outstanding &= !(1u8 << msg.compass_id);
        }
        self.outstanding == 0
    }
}
