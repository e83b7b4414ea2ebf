//! # MAVLink Message Catalog
//!
//! Binary layouts, numeric ids and `CRC_EXTRA` constants for every message the
//! engine reads or writes.
//!
//! Field order follows MAVLink wire ordering: base fields sorted by type size
//! (largest first, stable within a size), extension fields appended in
//! declaration order. All multi-byte values are little-endian. `char[N]`
//! fields are NUL-padded and not guaranteed NUL-terminated.

use bytes::{Buf, BufMut};
use serde::Serialize;

use super::protocol::MAVLINK_VERSION;

/// Static description of one message type
///
/// `write_payload` must emit exactly `ENCODED_LEN` bytes. `read_payload` is
/// always handed exactly `ENCODED_LEN` bytes (truncated v2 payloads are
/// zero-extended first).
pub trait MessageData: Sized {
    const ID: u32;
    const CRC_EXTRA: u8;
    const ENCODED_LEN: usize;

    fn write_payload(&self, buf: &mut Vec<u8>);

    fn read_payload(buf: &mut &[u8]) -> Self;

    /// Full-length payload bytes
    fn to_payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_LEN);
        self.write_payload(&mut buf);
        debug_assert_eq!(buf.len(), Self::ENCODED_LEN);
        buf
    }

    /// Decode from wire bytes of any length
    fn from_payload(payload: &[u8]) -> Self {
        let mut data = vec![0u8; Self::ENCODED_LEN];
        let n = payload.len().min(Self::ENCODED_LEN);
        data[..n].copy_from_slice(&payload[..n]);
        Self::read_payload(&mut &data[..])
    }
}

/// `CRC_EXTRA` for messages this engine does not decode but commonly sees
///
/// Keeps checksum validation active for the bulk of ArduPilot telemetry.
const PASSTHROUGH_CRC_EXTRA: &[(u32, u8)] = &[
    (2, 137),   // SYSTEM_TIME
    (27, 144),  // RAW_IMU
    (29, 115),  // SCALED_PRESSURE
    (30, 39),   // ATTITUDE
    (33, 104),  // GLOBAL_POSITION_INT
    (36, 222),  // SERVO_OUTPUT_RAW
    (42, 28),   // MISSION_CURRENT
    (62, 183),  // NAV_CONTROLLER_OUTPUT
    (74, 20),   // VFR_HUD
    (109, 185), // RADIO_STATUS
    (111, 34),  // TIMESYNC
    (125, 203), // POWER_STATUS
    (147, 154), // BATTERY_STATUS
    (152, 208), // MEMINFO
    (193, 71),  // EKF_STATUS_REPORT
    (241, 90),  // VIBRATION
    (242, 104), // HOME_POSITION
    (244, 95),  // MESSAGE_INTERVAL
    (300, 217), // PROTOCOL_VERSION
];

/// Look up the `CRC_EXTRA` constant for a message id
///
/// Returns `None` for ids outside the catalog; the decoder accepts those
/// frames unvalidated.
///
/// # Examples
///
/// ```
/// use flight_link::mavlink::messages::crc_extra;
///
/// assert_eq!(crc_extra(0), Some(50)); // HEARTBEAT
/// assert_eq!(crc_extra(0xFFFFFF), None);
/// ```
pub fn crc_extra(message_id: u32) -> Option<u8> {
    let decoded = match message_id {
        Heartbeat::ID => Some(Heartbeat::CRC_EXTRA),
        SysStatus::ID => Some(SysStatus::CRC_EXTRA),
        ParamRequestRead::ID => Some(ParamRequestRead::CRC_EXTRA),
        ParamRequestList::ID => Some(ParamRequestList::CRC_EXTRA),
        ParamValue::ID => Some(ParamValue::CRC_EXTRA),
        ParamSet::ID => Some(ParamSet::CRC_EXTRA),
        GpsRawInt::ID => Some(GpsRawInt::CRC_EXTRA),
        RcChannelsRaw::ID => Some(RcChannelsRaw::CRC_EXTRA),
        RcChannels::ID => Some(RcChannels::CRC_EXTRA),
        RequestDataStream::ID => Some(RequestDataStream::CRC_EXTRA),
        CommandLong::ID => Some(CommandLong::CRC_EXTRA),
        CommandAck::ID => Some(CommandAck::CRC_EXTRA),
        AutopilotVersion::ID => Some(AutopilotVersion::CRC_EXTRA),
        MagCalProgress::ID => Some(MagCalProgress::CRC_EXTRA),
        MagCalReport::ID => Some(MagCalReport::CRC_EXTRA),
        StatusText::ID => Some(StatusText::CRC_EXTRA),
        _ => None,
    };

    decoded.or_else(|| {
        PASSTHROUGH_CRC_EXTRA
            .iter()
            .find(|(id, _)| *id == message_id)
            .map(|&(_, extra)| extra)
    })
}

// ==================== Field helpers ====================

fn put_str(buf: &mut Vec<u8>, value: &str, width: usize) {
    let bytes = value.as_bytes();
    let n = bytes.len().min(width);
    buf.put_slice(&bytes[..n]);
    buf.put_bytes(0, width - n);
}

fn get_str(buf: &mut &[u8], width: usize) -> String {
    let raw = &(*buf)[..width];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(width);
    let value = String::from_utf8_lossy(&raw[..end]).into_owned();
    buf.advance(width);
    value
}

fn get_array<const N: usize>(buf: &mut &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    out
}

// ==================== Messages ====================

/// HEARTBEAT (#0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Heartbeat {
    pub custom_mode: u32,
    pub mav_type: u8,
    pub autopilot: u8,
    pub base_mode: u8,
    pub system_status: u8,
    pub mavlink_version: u8,
}

impl Heartbeat {
    /// Heartbeat announcing a ground station peer
    pub fn ground_station() -> Self {
        Self {
            custom_mode: 0,
            mav_type: super::protocol::MAV_TYPE_GCS,
            autopilot: super::protocol::MAV_AUTOPILOT_INVALID,
            base_mode: 0,
            system_status: super::protocol::MAV_STATE_ACTIVE,
            mavlink_version: MAVLINK_VERSION,
        }
    }
}

impl MessageData for Heartbeat {
    const ID: u32 = 0;
    const CRC_EXTRA: u8 = 50;
    const ENCODED_LEN: usize = 9;

    fn write_payload(&self, buf: &mut Vec<u8>) {
        buf.put_u32_le(self.custom_mode);
        buf.put_u8(self.mav_type);
        buf.put_u8(self.autopilot);
        buf.put_u8(self.base_mode);
        buf.put_u8(self.system_status);
        buf.put_u8(self.mavlink_version);
    }

    fn read_payload(buf: &mut &[u8]) -> Self {
        Self {
            custom_mode: buf.get_u32_le(),
            mav_type: buf.get_u8(),
            autopilot: buf.get_u8(),
            base_mode: buf.get_u8(),
            system_status: buf.get_u8(),
            mavlink_version: buf.get_u8(),
        }
    }
}

/// SYS_STATUS (#1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SysStatus {
    pub sensors_present: u32,
    pub sensors_enabled: u32,
    pub sensors_health: u32,
    pub load: u16,
    /// Millivolts, `u16::MAX` when unknown
    pub voltage_battery: u16,
    /// Centiamps, -1 when unknown
    pub current_battery: i16,
    pub drop_rate_comm: u16,
    pub errors_comm: u16,
    pub errors_count: [u16; 4],
    /// Percent, -1 when unknown
    pub battery_remaining: i8,
}

impl MessageData for SysStatus {
    const ID: u32 = 1;
    const CRC_EXTRA: u8 = 124;
    const ENCODED_LEN: usize = 31;

    fn write_payload(&self, buf: &mut Vec<u8>) {
        buf.put_u32_le(self.sensors_present);
        buf.put_u32_le(self.sensors_enabled);
        buf.put_u32_le(self.sensors_health);
        buf.put_u16_le(self.load);
        buf.put_u16_le(self.voltage_battery);
        buf.put_i16_le(self.current_battery);
        buf.put_u16_le(self.drop_rate_comm);
        buf.put_u16_le(self.errors_comm);
        for count in self.errors_count {
            buf.put_u16_le(count);
        }
        buf.put_i8(self.battery_remaining);
    }

    fn read_payload(buf: &mut &[u8]) -> Self {
        Self {
            sensors_present: buf.get_u32_le(),
            sensors_enabled: buf.get_u32_le(),
            sensors_health: buf.get_u32_le(),
            load: buf.get_u16_le(),
            voltage_battery: buf.get_u16_le(),
            current_battery: buf.get_i16_le(),
            drop_rate_comm: buf.get_u16_le(),
            errors_comm: buf.get_u16_le(),
            errors_count: [buf.get_u16_le(), buf.get_u16_le(), buf.get_u16_le(), buf.get_u16_le()],
            battery_remaining: buf.get_i8(),
        }
    }
}

/// PARAM_REQUEST_READ (#20)
///
/// `param_index` of -1 selects by name instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamRequestRead {
    pub param_index: i16,
    pub target_system: u8,
    pub target_component: u8,
    pub param_id: String,
}

impl MessageData for ParamRequestRead {
    const ID: u32 = 20;
    const CRC_EXTRA: u8 = 214;
    const ENCODED_LEN: usize = 20;

    fn write_payload(&self, buf: &mut Vec<u8>) {
        buf.put_i16_le(self.param_index);
        buf.put_u8(self.target_system);
        buf.put_u8(self.target_component);
        put_str(buf, &self.param_id, 16);
    }

    fn read_payload(buf: &mut &[u8]) -> Self {
        Self {
            param_index: buf.get_i16_le(),
            target_system: buf.get_u8(),
            target_component: buf.get_u8(),
            param_id: get_str(buf, 16),
        }
    }
}

/// PARAM_REQUEST_LIST (#21)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParamRequestList {
    pub target_system: u8,
    pub target_component: u8,
}

impl MessageData for ParamRequestList {
    const ID: u32 = 21;
    const CRC_EXTRA: u8 = 159;
    const ENCODED_LEN: usize = 2;

    fn write_payload(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.target_system);
        buf.put_u8(self.target_component);
    }

    fn read_payload(buf: &mut &[u8]) -> Self {
        Self {
            target_system: buf.get_u8(),
            target_component: buf.get_u8(),
        }
    }
}

/// PARAM_VALUE (#22)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamValue {
    pub param_value: f32,
    pub param_count: u16,
    pub param_index: u16,
    pub param_id: String,
    pub param_type: u8,
}

impl MessageData for ParamValue {
    const ID: u32 = 22;
    const CRC_EXTRA: u8 = 220;
    const ENCODED_LEN: usize = 25;

    fn write_payload(&self, buf: &mut Vec<u8>) {
        buf.put_f32_le(self.param_value);
        buf.put_u16_le(self.param_count);
        buf.put_u16_le(self.param_index);
        put_str(buf, &self.param_id, 16);
        buf.put_u8(self.param_type);
    }

    fn read_payload(buf: &mut &[u8]) -> Self {
        Self {
            param_value: buf.get_f32_le(),
            param_count: buf.get_u16_le(),
            param_index: buf.get_u16_le(),
            param_id: get_str(buf, 16),
            param_type: buf.get_u8(),
        }
    }
}

/// PARAM_SET (#23)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSet {
    pub param_value: f32,
    pub target_system: u8,
    pub target_component: u8,
    pub param_id: String,
    pub param_type: u8,
}

impl MessageData for ParamSet {
    const ID: u32 = 23;
    const CRC_EXTRA: u8 = 168;
    const ENCODED_LEN: usize = 23;

    fn write_payload(&self, buf: &mut Vec<u8>) {
        buf.put_f32_le(self.param_value);
        buf.put_u8(self.target_system);
        buf.put_u8(self.target_component);
        put_str(buf, &self.param_id, 16);
        buf.put_u8(self.param_type);
    }

    fn read_payload(buf: &mut &[u8]) -> Self {
        Self {
            param_value: buf.get_f32_le(),
            target_system: buf.get_u8(),
            target_component: buf.get_u8(),
            param_id: get_str(buf, 16),
            param_type: buf.get_u8(),
        }
    }
}

/// GPS_RAW_INT (#24)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GpsRawInt {
    pub time_usec: u64,
    /// Degrees × 1e7
    pub lat: i32,
    /// Degrees × 1e7
    pub lon: i32,
    /// Millimetres above MSL
    pub alt: i32,
    pub eph: u16,
    pub epv: u16,
    /// cm/s
    pub vel: u16,
    /// Centidegrees
    pub cog: u16,
    pub fix_type: u8,
    pub satellites_visible: u8,
}

impl MessageData for GpsRawInt {
    const ID: u32 = 24;
    const CRC_EXTRA: u8 = 24;
    const ENCODED_LEN: usize = 30;

    fn write_payload(&self, buf: &mut Vec<u8>) {
        buf.put_u64_le(self.time_usec);
        buf.put_i32_le(self.lat);
        buf.put_i32_le(self.lon);
        buf.put_i32_le(self.alt);
        buf.put_u16_le(self.eph);
        buf.put_u16_le(self.epv);
        buf.put_u16_le(self.vel);
        buf.put_u16_le(self.cog);
        buf.put_u8(self.fix_type);
        buf.put_u8(self.satellites_visible);
    }

    fn read_payload(buf: &mut &[u8]) -> Self {
        Self {
            time_usec: buf.get_u64_le(),
            lat: buf.get_i32_le(),
            lon: buf.get_i32_le(),
            alt: buf.get_i32_le(),
            eph: buf.get_u16_le(),
            epv: buf.get_u16_le(),
            vel: buf.get_u16_le(),
            cog: buf.get_u16_le(),
            fix_type: buf.get_u8(),
            satellites_visible: buf.get_u8(),
        }
    }
}

/// RC_CHANNELS_RAW (#35), legacy 8-channel report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RcChannelsRaw {
    pub time_boot_ms: u32,
    pub channels: [u16; 8],
    pub port: u8,
    pub rssi: u8,
}

impl MessageData for RcChannelsRaw {
    const ID: u32 = 35;
    const CRC_EXTRA: u8 = 244;
    const ENCODED_LEN: usize = 22;

    fn write_payload(&self, buf: &mut Vec<u8>) {
        buf.put_u32_le(self.time_boot_ms);
        for channel in self.channels {
            buf.put_u16_le(channel);
        }
        buf.put_u8(self.port);
        buf.put_u8(self.rssi);
    }

    fn read_payload(buf: &mut &[u8]) -> Self {
        let time_boot_ms = buf.get_u32_le();
        let mut channels = [0u16; 8];
        for channel in channels.iter_mut() {
            *channel = buf.get_u16_le();
        }
        Self {
            time_boot_ms,
            channels,
            port: buf.get_u8(),
            rssi: buf.get_u8(),
        }
    }
}

/// RC_CHANNELS (#65), 18-channel report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RcChannels {
    pub time_boot_ms: u32,
    pub channels: [u16; 18],
    pub chancount: u8,
    pub rssi: u8,
}

impl MessageData for RcChannels {
    const ID: u32 = 65;
    const CRC_EXTRA: u8 = 118;
    const ENCODED_LEN: usize = 42;

    fn write_payload(&self, buf: &mut Vec<u8>) {
        buf.put_u32_le(self.time_boot_ms);
        for channel in self.channels {
            buf.put_u16_le(channel);
        }
        buf.put_u8(self.chancount);
        buf.put_u8(self.rssi);
    }

    fn read_payload(buf: &mut &[u8]) -> Self {
        let time_boot_ms = buf.get_u32_le();
        let mut channels = [0u16; 18];
        for channel in channels.iter_mut() {
            *channel = buf.get_u16_le();
        }
        Self {
            time_boot_ms,
            channels,
            chancount: buf.get_u8(),
            rssi: buf.get_u8(),
        }
    }
}

/// REQUEST_DATA_STREAM (#66)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RequestDataStream {
    pub req_message_rate: u16,
    pub target_system: u8,
    pub target_component: u8,
    pub req_stream_id: u8,
    pub start_stop: u8,
}

impl MessageData for RequestDataStream {
    const ID: u32 = 66;
    const CRC_EXTRA: u8 = 148;
    const ENCODED_LEN: usize = 6;

    fn write_payload(&self, buf: &mut Vec<u8>) {
        buf.put_u16_le(self.req_message_rate);
        buf.put_u8(self.target_system);
        buf.put_u8(self.target_component);
        buf.put_u8(self.req_stream_id);
        buf.put_u8(self.start_stop);
    }

    fn read_payload(buf: &mut &[u8]) -> Self {
        Self {
            req_message_rate: buf.get_u16_le(),
            target_system: buf.get_u8(),
            target_component: buf.get_u8(),
            req_stream_id: buf.get_u8(),
            start_stop: buf.get_u8(),
        }
    }
}

/// COMMAND_LONG (#76)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CommandLong {
    pub params: [f32; 7],
    pub command: u16,
    pub target_system: u8,
    pub target_component: u8,
    pub confirmation: u8,
}

impl MessageData for CommandLong {
    const ID: u32 = 76;
    const CRC_EXTRA: u8 = 152;
    const ENCODED_LEN: usize = 33;

    fn write_payload(&self, buf: &mut Vec<u8>) {
        for param in self.params {
            buf.put_f32_le(param);
        }
        buf.put_u16_le(self.command);
        buf.put_u8(self.target_system);
        buf.put_u8(self.target_component);
        buf.put_u8(self.confirmation);
    }

    fn read_payload(buf: &mut &[u8]) -> Self {
        let mut params = [0f32; 7];
        for param in params.iter_mut() {
            *param = buf.get_f32_le();
        }
        Self {
            params,
            command: buf.get_u16_le(),
            target_system: buf.get_u8(),
            target_component: buf.get_u8(),
            confirmation: buf.get_u8(),
        }
    }
}

/// COMMAND_ACK (#77), including the v2 extension fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommandAck {
    pub command: u16,
    pub result: u8,
    pub progress: u8,
    pub result_param2: i32,
    pub target_system: u8,
    pub target_component: u8,
}

impl CommandAck {
    /// Plain acknowledgement with zeroed extension fields
    pub fn new(command: u16, result: u8) -> Self {
        Self {
            command,
            result,
            progress: 0,
            result_param2: 0,
            target_system: 0,
            target_component: 0,
        }
    }
}

impl MessageData for CommandAck {
    const ID: u32 = 77;
    const CRC_EXTRA: u8 = 143;
    const ENCODED_LEN: usize = 10;

    fn write_payload(&self, buf: &mut Vec<u8>) {
        buf.put_u16_le(self.command);
        buf.put_u8(self.result);
        buf.put_u8(self.progress);
        buf.put_i32_le(self.result_param2);
        buf.put_u8(self.target_system);
        buf.put_u8(self.target_component);
    }

    fn read_payload(buf: &mut &[u8]) -> Self {
        Self {
            command: buf.get_u16_le(),
            result: buf.get_u8(),
            progress: buf.get_u8(),
            result_param2: buf.get_i32_le(),
            target_system: buf.get_u8(),
            target_component: buf.get_u8(),
        }
    }
}

/// AUTOPILOT_VERSION (#148)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AutopilotVersion {
    pub capabilities: u64,
    pub uid: u64,
    pub flight_sw_version: u32,
    pub middleware_sw_version: u32,
    pub os_sw_version: u32,
    pub board_version: u32,
    pub vendor_id: u16,
    pub product_id: u16,
    pub flight_custom_version: [u8; 8],
    pub middleware_custom_version: [u8; 8],
    pub os_custom_version: [u8; 8],
}

impl AutopilotVersion {
    /// `(major, minor, patch)` from the packed flight software version
    pub fn flight_version(&self) -> (u8, u8, u8) {
        let v = self.flight_sw_version;
        ((v >> 24) as u8, (v >> 16) as u8, (v >> 8) as u8)
    }
}

impl MessageData for AutopilotVersion {
    const ID: u32 = 148;
    const CRC_EXTRA: u8 = 178;
    const ENCODED_LEN: usize = 60;

    fn write_payload(&self, buf: &mut Vec<u8>) {
        buf.put_u64_le(self.capabilities);
        buf.put_u64_le(self.uid);
        buf.put_u32_le(self.flight_sw_version);
        buf.put_u32_le(self.middleware_sw_version);
        buf.put_u32_le(self.os_sw_version);
        buf.put_u32_le(self.board_version);
        buf.put_u16_le(self.vendor_id);
        buf.put_u16_le(self.product_id);
        buf.put_slice(&self.flight_custom_version);
        buf.put_slice(&self.middleware_custom_version);
        buf.put_slice(&self.os_custom_version);
    }

    fn read_payload(buf: &mut &[u8]) -> Self {
        Self {
            capabilities: buf.get_u64_le(),
            uid: buf.get_u64_le(),
            flight_sw_version: buf.get_u32_le(),
            middleware_sw_version: buf.get_u32_le(),
            os_sw_version: buf.get_u32_le(),
            board_version: buf.get_u32_le(),
            vendor_id: buf.get_u16_le(),
            product_id: buf.get_u16_le(),
            flight_custom_version: get_array(buf),
            middleware_custom_version: get_array(buf),
            os_custom_version: get_array(buf),
        }
    }
}

/// MAG_CAL_PROGRESS (#191)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MagCalProgress {
    pub direction: [f32; 3],
    pub compass_id: u8,
    pub cal_mask: u8,
    pub cal_status: u8,
    pub attempt: u8,
    pub completion_pct: u8,
    pub completion_mask: [u8; 10],
}

impl MessageData for MagCalProgress {
    const ID: u32 = 191;
    const CRC_EXTRA: u8 = 92;
    const ENCODED_LEN: usize = 27;

    fn write_payload(&self, buf: &mut Vec<u8>) {
        for d in self.direction {
            buf.put_f32_le(d);
        }
        buf.put_u8(self.compass_id);
        buf.put_u8(self.cal_mask);
        buf.put_u8(self.cal_status);
        buf.put_u8(self.attempt);
        buf.put_u8(self.completion_pct);
        buf.put_slice(&self.completion_mask);
    }

    fn read_payload(buf: &mut &[u8]) -> Self {
        Self {
            direction: [buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le()],
            compass_id: buf.get_u8(),
            cal_mask: buf.get_u8(),
            cal_status: buf.get_u8(),
            attempt: buf.get_u8(),
            completion_pct: buf.get_u8(),
            completion_mask: get_array(buf),
        }
    }
}

/// MAG_CAL_REPORT (#192), including the v2 extension fields
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MagCalReport {
    pub fitness: f32,
    pub offsets: [f32; 3],
    pub diagonals: [f32; 3],
    pub off_diagonals: [f32; 3],
    pub compass_id: u8,
    pub cal_mask: u8,
    pub cal_status: u8,
    pub autosaved: u8,
    pub orientation_confidence: f32,
    pub old_orientation: u8,
    pub new_orientation: u8,
    pub scale_factor: f32,
}

impl MessageData for MagCalReport {
    const ID: u32 = 192;
    const CRC_EXTRA: u8 = 36;
    const ENCODED_LEN: usize = 54;

    fn write_payload(&self, buf: &mut Vec<u8>) {
        buf.put_f32_le(self.fitness);
        for v in self.offsets.iter().chain(&self.diagonals).chain(&self.off_diagonals) {
            buf.put_f32_le(*v);
        }
        buf.put_u8(self.compass_id);
        buf.put_u8(self.cal_mask);
        buf.put_u8(self.cal_status);
        buf.put_u8(self.autosaved);
        buf.put_f32_le(self.orientation_confidence);
        buf.put_u8(self.old_orientation);
        buf.put_u8(self.new_orientation);
        buf.put_f32_le(self.scale_factor);
    }

    fn read_payload(buf: &mut &[u8]) -> Self {
        let fitness = buf.get_f32_le();
        let offsets = [buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le()];
        let diagonals = [buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le()];
        let off_diagonals = [buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le()];
        Self {
            fitness,
            offsets,
            diagonals,
            off_diagonals,
            compass_id: buf.get_u8(),
            cal_mask: buf.get_u8(),
            cal_status: buf.get_u8(),
            autosaved: buf.get_u8(),
            orientation_confidence: buf.get_f32_le(),
            old_orientation: buf.get_u8(),
            new_orientation: buf.get_u8(),
            scale_factor: buf.get_f32_le(),
        }
    }
}

/// STATUSTEXT (#253)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusText {
    /// MAV_SEVERITY, 0 = emergency … 7 = debug
    pub severity: u8,
    pub text: String,
}

impl MessageData for StatusText {
    const ID: u32 = 253;
    const CRC_EXTRA: u8 = 83;
    const ENCODED_LEN: usize = 51;

    fn write_payload(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.severity);
        put_str(buf, &self.text, 50);
    }

    fn read_payload(buf: &mut &[u8]) -> Self {
        Self {
            severity: buf.get_u8(),
            text: get_str(buf, 50),
        }
    }
}

// ==================== Message enum ====================

/// Any catalog message, decoded
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Message {
    Heartbeat(Heartbeat),
    SysStatus(SysStatus),
    ParamRequestRead(ParamRequestRead),
    ParamRequestList(ParamRequestList),
    ParamValue(ParamValue),
    ParamSet(ParamSet),
    GpsRawInt(GpsRawInt),
    RcChannelsRaw(RcChannelsRaw),
    RcChannels(RcChannels),
    RequestDataStream(RequestDataStream),
    CommandLong(CommandLong),
    CommandAck(CommandAck),
    AutopilotVersion(AutopilotVersion),
    MagCalProgress(MagCalProgress),
    MagCalReport(MagCalReport),
    StatusText(StatusText),
    /// Id outside the catalog; carried through untouched
    Unknown { id: u32, payload: Vec<u8> },
}

impl Message {
    /// Decode a payload for the given message id
    pub fn decode(message_id: u32, payload: &[u8]) -> Self {
        match message_id {
            Heartbeat::ID => Message::Heartbeat(Heartbeat::from_payload(payload)),
            SysStatus::ID => Message::SysStatus(SysStatus::from_payload(payload)),
            ParamRequestRead::ID => Message::ParamRequestRead(ParamRequestRead::from_payload(payload)),
            ParamRequestList::ID => Message::ParamRequestList(ParamRequestList::from_payload(payload)),
            ParamValue::ID => Message::ParamValue(ParamValue::from_payload(payload)),
            ParamSet::ID => Message::ParamSet(ParamSet::from_payload(payload)),
            GpsRawInt::ID => Message::GpsRawInt(GpsRawInt::from_payload(payload)),
            RcChannelsRaw::ID => Message::RcChannelsRaw(RcChannelsRaw::from_payload(payload)),
            RcChannels::ID => Message::RcChannels(RcChannels::from_payload(payload)),
            RequestDataStream::ID => Message::RequestDataStream(RequestDataStream::from_payload(payload)),
            CommandLong::ID => Message::CommandLong(CommandLong::from_payload(payload)),
            CommandAck::ID => Message::CommandAck(CommandAck::from_payload(payload)),
            AutopilotVersion::ID => Message::AutopilotVersion(AutopilotVersion::from_payload(payload)),
            MagCalProgress::ID => Message::MagCalProgress(MagCalProgress::from_payload(payload)),
            MagCalReport::ID => Message::MagCalReport(MagCalReport::from_payload(payload)),
            StatusText::ID => Message::StatusText(StatusText::from_payload(payload)),
            id => Message::Unknown {
                id,
                payload: payload.to_vec(),
            },
        }
    }

    /// Numeric message id
    pub fn message_id(&self) -> u32 {
        match self {
            Message::Heartbeat(_) => Heartbeat::ID,
            Message::SysStatus(_) => SysStatus::ID,
            Message::ParamRequestRead(_) => ParamRequestRead::ID,
            Message::ParamRequestList(_) => ParamRequestList::ID,
            Message::ParamValue(_) => ParamValue::ID,
            Message::ParamSet(_) => ParamSet::ID,
            Message::GpsRawInt(_) => GpsRawInt::ID,
            Message::RcChannelsRaw(_) => RcChannelsRaw::ID,
            Message::RcChannels(_) => RcChannels::ID,
            Message::RequestDataStream(_) => RequestDataStream::ID,
            Message::CommandLong(_) => CommandLong::ID,
            Message::CommandAck(_) => CommandAck::ID,
            Message::AutopilotVersion(_) => AutopilotVersion::ID,
            Message::MagCalProgress(_) => MagCalProgress::ID,
            Message::MagCalReport(_) => MagCalReport::ID,
            Message::StatusText(_) => StatusText::ID,
            Message::Unknown { id, .. } => *id,
        }
    }

    /// Full-length payload bytes
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Message::Heartbeat(m) => m.to_payload(),
            Message::SysStatus(m) => m.to_payload(),
            Message::ParamRequestRead(m) => m.to_payload(),
            Message::ParamRequestList(m) => m.to_payload(),
            Message::ParamValue(m) => m.to_payload(),
            Message::ParamSet(m) => m.to_payload(),
            Message::GpsRawInt(m) => m.to_payload(),
            Message::RcChannelsRaw(m) => m.to_payload(),
            Message::RcChannels(m) => m.to_payload(),
            Message::RequestDataStream(m) => m.to_payload(),
            Message::CommandLong(m) => m.to_payload(),
            Message::CommandAck(m) => m.to_payload(),
            Message::AutopilotVersion(m) => m.to_payload(),
            Message::MagCalProgress(m) => m.to_payload(),
            Message::MagCalReport(m) => m.to_payload(),
            Message::StatusText(m) => m.to_payload(),
            Message::Unknown { payload, .. } => payload.clone(),
        }
    }
}
