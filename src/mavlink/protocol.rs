//! # MAVLink Protocol Constants and Types
//!
//! Wire-level definitions shared by the decoder, encoder and message catalog.

use serde::Serialize;

/// MAVLink 1 start marker
pub const MAVLINK_STX_V1: u8 = 0xFE;

/// MAVLink 2 start marker
pub const MAVLINK_STX_V2: u8 = 0xFD;

/// v1 header length including the start marker
pub const HEADER_LEN_V1: usize = 6;

/// v2 header length including the start marker
pub const HEADER_LEN_V2: usize = 10;

/// Trailing checksum length (both versions)
pub const CHECKSUM_LEN: usize = 2;

/// Largest payload the length byte can describe
pub const MAX_PAYLOAD_LEN: usize = 255;

/// Default ground-station system id
pub const GCS_SYSTEM_ID: u8 = 255;

/// MAV_COMP_ID_MISSIONPLANNER
pub const GCS_COMPONENT_ID: u8 = 190;

/// Protocol version carried in our own heartbeat
pub const MAVLINK_VERSION: u8 = 3;

/// MAV_MODE_FLAG_SAFETY_ARMED bit in `base_mode`
pub const MAV_MODE_FLAG_SAFETY_ARMED: u8 = 0x80;

/// MAV_TYPE_GCS
pub const MAV_TYPE_GCS: u8 = 6;

/// MAV_AUTOPILOT_ARDUPILOTMEGA
pub const MAV_AUTOPILOT_ARDUPILOTMEGA: u8 = 3;

/// MAV_AUTOPILOT_INVALID (used by non-flight-controller peers)
pub const MAV_AUTOPILOT_INVALID: u8 = 8;

/// MAV_STATE_ACTIVE
pub const MAV_STATE_ACTIVE: u8 = 4;

/// MAV_PARAM_TYPE_REAL32
pub const MAV_PARAM_TYPE_REAL32: u8 = 9;

/// Command ids used by this engine
pub mod mav_cmd {
    /// Sentinel id used by the accelerometer position handshake
    pub const ACCELCAL_CONFIRM: u16 = 0;
    pub const DO_MOTOR_TEST: u16 = 209;
    pub const PREFLIGHT_CALIBRATION: u16 = 241;
    pub const PREFLIGHT_REBOOT_SHUTDOWN: u16 = 246;
    pub const COMPONENT_ARM_DISARM: u16 = 400;
    pub const SET_MESSAGE_INTERVAL: u16 = 511;
    pub const REQUEST_AUTOPILOT_CAPABILITIES: u16 = 520;
    pub const DO_START_MAG_CAL: u16 = 42424;
    pub const DO_ACCEPT_MAG_CAL: u16 = 42425;
    pub const DO_CANCEL_MAG_CAL: u16 = 42426;
}

/// MAV_DATA_STREAM ids for REQUEST_DATA_STREAM
pub mod data_stream {
    pub const ALL: u8 = 0;
    pub const RAW_SENSORS: u8 = 1;
    pub const EXTENDED_STATUS: u8 = 2;
    pub const RC_CHANNELS: u8 = 3;
    pub const POSITION: u8 = 6;
    pub const EXTRA1: u8 = 10;
    pub const EXTRA2: u8 = 11;
    pub const EXTRA3: u8 = 12;
}

/// Framing version of a received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MavlinkVersion {
    V1,
    V2,
}

impl MavlinkVersion {
    /// Header length including the start marker
    pub const fn header_len(self) -> usize {
        match self {
            MavlinkVersion::V1 => HEADER_LEN_V1,
            MavlinkVersion::V2 => HEADER_LEN_V2,
        }
    }

    /// Version whose start marker is `byte`, if any
    pub const fn from_start_marker(byte: u8) -> Option<Self> {
        match byte {
            MAVLINK_STX_V1 => Some(MavlinkVersion::V1),
            MAVLINK_STX_V2 => Some(MavlinkVersion::V2),
            _ => None,
        }
    }
}

/// One wire unit as extracted by the decoder
///
/// `payload` holds exactly the bytes that were on the wire; message decoders
/// zero-extend it to the declared size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: MavlinkVersion,
    pub sequence: u8,
    pub system_id: u8,
    pub component_id: u8,
    /// 8-bit for v1, 24-bit for v2
    pub message_id: u32,
    pub payload: Vec<u8>,
    /// Checksum as received (little-endian on the wire)
    pub checksum: u16,
}

/// MAV_RESULT as carried in COMMAND_ACK
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MavResult {
    Accepted,
    TemporarilyRejected,
    Denied,
    Unsupported,
    Failed,
    InProgress,
    Cancelled,
    Other(u8),
}

impl From<u8> for MavResult {
    fn from(value: u8) -> Self {
        match value {
            0 => MavResult::Accepted,
            1 => MavResult::TemporarilyRejected,
            2 => MavResult::Denied,
            3 => MavResult::Unsupported,
            4 => MavResult::Failed,
            5 => MavResult::InProgress,
            6 => MavResult::Cancelled,
            other => MavResult::Other(other),
        }
    }
}

impl From<MavResult> for u8 {
    fn from(value: MavResult) -> Self {
        match value {
            MavResult::Accepted => 0,
            MavResult::TemporarilyRejected => 1,
            MavResult::Denied => 2,
            MavResult::Unsupported => 3,
            MavResult::Failed => 4,
            MavResult::InProgress => 5,
            MavResult::Cancelled => 6,
            MavResult::Other(other) => other,
        }
    }
}

/// Coarse vehicle category derived from heartbeat MAV_TYPE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VehicleCategory {
    Copter,
    Plane,
    Rover,
    Boat,
    Sub,
    Helicopter,
    Vtol,
    Other(u8),
}

impl VehicleCategory {
    /// Map a MAV_TYPE value
    pub fn from_mav_type(mav_type: u8) -> Self {
        match mav_type {
            2 | 3 | 13 | 14 | 15 => VehicleCategory::Copter,
            1 | 16 => VehicleCategory::Plane,
            4 => VehicleCategory::Helicopter,
            10 => VehicleCategory::Rover,
            11 => VehicleCategory::Boat,
            12 => VehicleCategory::Sub,
            19..=25 => VehicleCategory::Vtol,
            other => VehicleCategory::Other(other),
        }
    }
}
