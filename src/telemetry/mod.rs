//! # Telemetry Module
//!
//! Vehicle state as delivered to observers.
//!
//! This module handles:
//! - Decoding telemetry messages into plain records (GPS, battery, RC, sensors)
//! - The [`VehicleSnapshot`] published on every state change
//!
//! Everything here is `Serialize` so observers can log snapshots as JSON lines.

use serde::Serialize;

use crate::calibration::{CalibrationKind, CompassProgress};
use crate::mavlink::messages::{AutopilotVersion, GpsRawInt, Heartbeat, RcChannels, RcChannelsRaw, SysStatus};
use crate::mavlink::protocol::MAV_MODE_FLAG_SAFETY_ARMED;
use crate::mavlink::{ParserStats, VehicleCategory};
use crate::params::ParamTable;
use crate::session::SessionPhase;

/// Who we are talking to, latched from the first accepted heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VehicleIdentity {
    pub system_id: u8,
    pub component_id: u8,
    pub autopilot: u8,
    pub mav_type: u8,
    pub category: VehicleCategory,
}

/// Firmware details from AUTOPILOT_VERSION
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FirmwareInfo {
    /// `(major, minor, patch)`
    pub version: (u8, u8, u8),
    /// MAV_PROTOCOL_CAPABILITY bits
    pub capabilities: u64,
    pub board_version: u32,
}

impl From<&AutopilotVersion> for FirmwareInfo {
    fn from(msg: &AutopilotVersion) -> Self {
        Self {
            version: msg.flight_version(),
            capabilities: msg.capabilities,
            board_version: msg.board_version,
        }
    }
}

/// GPS fix from GPS_RAW_INT
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GpsFix {
    /// GPS_FIX_TYPE (0 = no GPS, 3 = 3D, 6 = RTK fixed)
    pub fix_type: u8,
    pub satellites: u8,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    /// Metres above MSL
    pub altitude_m: f32,
    /// Horizontal dilution; `None` when unknown
    pub hdop: Option<f32>,
}

impl From<&GpsRawInt> for GpsFix {
    fn from(msg: &GpsRawInt) -> Self {
        Self {
            fix_type: msg.fix_type,
            satellites: msg.satellites_visible,
            latitude_deg: msg.lat as f64 / 1e7,
            longitude_deg: msg.lon as f64 / 1e7,
            altitude_m: msg.alt as f32 / 1000.0,
            hdop: (msg.eph != u16::MAX).then(|| msg.eph as f32 / 100.0),
        }
    }
}

impl GpsFix {
    /// At least a 3D fix
    pub fn has_3d_fix(&self) -> bool {
        self.fix_type >= 3
    }
}

/// Battery state from SYS_STATUS
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatteryStatus {
    pub voltage_v: Option<f32>,
    pub current_a: Option<f32>,
    pub remaining_pct: Option<u8>,
}

/// Onboard sensor bitmasks (MAV_SYS_STATUS_SENSOR)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SensorHealth {
    pub present: u32,
    pub enabled: u32,
    pub healthy: u32,
}

impl SensorHealth {
    /// Present and enabled but reporting unhealthy
    pub fn unhealthy(&self) -> u32 {
        self.present & self.enabled & !self.healthy
    }
}

/// Split SYS_STATUS into battery and sensor records
pub fn decode_sys_status(msg: &SysStatus) -> (BatteryStatus, SensorHealth) {
    let battery = BatteryStatus {
        voltage_v: (msg.voltage_battery != u16::MAX).then(|| msg.voltage_battery as f32 / 1000.0),
        current_a: (msg.current_battery >= 0).then(|| msg.current_battery as f32 / 100.0),
        remaining_pct: u8::try_from(msg.battery_remaining).ok(),
    };
    let sensors = SensorHealth {
        present: msg.sensors_present,
        enabled: msg.sensors_enabled,
        healthy: msg.sensors_health,
    };
    (battery, sensors)
}

/// RC input as seen by the vehicle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RcInput {
    /// PWM microseconds; unused channels dropped
    pub channels: Vec<u16>,
    /// 0-254, `None` when unknown (255)
    pub rssi: Option<u8>,
}

impl From<&RcChannels> for RcInput {
    fn from(msg: &RcChannels) -> Self {
        let count = (msg.chancount as usize).min(msg.channels.len());
        Self {
            channels: msg.channels[..count].to_vec(),
            rssi: (msg.rssi != u8::MAX).then_some(msg.rssi),
        }
    }
}

impl From<&RcChannelsRaw> for RcInput {
    fn from(msg: &RcChannelsRaw) -> Self {
        // UINT16_MAX marks an unused channel
        let channels = msg.channels.iter().copied().take_while(|c| *c != u16::MAX).collect();
        Self {
            channels,
            rssi: (msg.rssi != u8::MAX).then_some(msg.rssi),
        }
    }
}

/// Calibration state visible to observers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CalibrationStatus {
    pub active: Option<CalibrationKind>,
    /// Latest progress per compass id
    pub compass: Vec<CompassProgress>,
}

/// Everything observers need to render the vehicle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VehicleSnapshot {
    pub phase: SessionPhase,
    pub identity: Option<VehicleIdentity>,
    pub armed: bool,
    pub custom_mode: u32,
    /// MAV_STATE
    pub system_status: u8,
    pub firmware: Option<FirmwareInfo>,
    pub gps: Option<GpsFix>,
    pub battery: Option<BatteryStatus>,
    pub sensors: Option<SensorHealth>,
    pub rc: Option<RcInput>,
    pub params: ParamTable,
    /// `(received, total)` of the current download
    pub param_progress: (usize, usize),
    pub calibration: CalibrationStatus,
    /// Decoder counters; after a disconnect, the totals of the session that ended
    pub link: ParserStats,
    /// Why the last session ended
    pub last_disconnect: Option<String>,
}

impl VehicleSnapshot {
    /// Refresh the fields carried by every target heartbeat
    pub fn apply_heartbeat(&mut self, heartbeat: &Heartbeat) {
        self.armed = heartbeat.base_mode & MAV_MODE_FLAG_SAFETY_ARMED != 0;
        self.custom_mode = heartbeat.custom_mode;
        self.system_status = heartbeat.system_status;
    }

    /// Record compass progress, replacing the entry for that compass
    pub fn apply_compass_progress(&mut self, progress: CompassProgress) {
        match self
            .calibration
            .compass
            .iter_mut()
            .find(|p| p.compass_id == progress.compass_id)
        {
            Some(existing) => *existing = progress,
            None => self.calibration.compass.push(progress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sys_status(voltage: u16, current: i16, remaining: i8) -> SysStatus {
        SysStatus {
            sensors_present: 0b111,
            sensors_enabled: 0b111,
            sensors_health: 0b101,
            load: 0,
            voltage_battery: voltage,
            current_battery: current,
            drop_rate_comm: 0,
            errors_comm: 0,
            errors_count: [0; 4],
            battery_remaining: remaining,
        }
    }

    // ==================== Decode Tests ====================

    #[test]
    fn test_sys_status_units() {
        let (battery, sensors) = decode_sys_status(&sys_status(12_600, 1_250, 87));
        assert_eq!(battery.voltage_v, Some(12.6));
        assert_eq!(battery.current_a, Some(12.5));
        assert_eq!(battery.remaining_pct, Some(87));
        assert_eq!(sensors.unhealthy(), 0b010);
    }

    #[test]
    fn test_sys_status_unknown_markers() {
        let (battery, _) = decode_sys_status(&sys_status(u16::MAX, -1, -1));
        assert_eq!(battery, BatteryStatus {
            voltage_v: None,
            current_a: None,
            remaining_pct: None,
        });
    }

    #[test]
    fn test_gps_scaling() {
        let msg = GpsRawInt {
            time_usec: 0,
            lat: 473_977_420,
            lon: 85_455_940,
            alt: 488_000,
            eph: 120,
            epv: u16::MAX,
            vel: 0,
            cog: 0,
            fix_type: 3,
            satellites_visible: 11,
        };
        let fix = GpsFix::from(&msg);
        assert!((fix.latitude_deg - 47.397742).abs() < 1e-6);
        assert!((fix.longitude_deg - 8.545594).abs() < 1e-6);
        assert_eq!(fix.altitude_m, 488.0);
        assert_eq!(fix.hdop, Some(1.2));
        assert!(fix.has_3d_fix());
    }

    #[test]
    fn test_rc_channels_truncated_to_count() {
        let mut channels = [0u16; 18];
        channels[..4].copy_from_slice(&[1500, 1500, 1000, 1500]);
        let msg = RcChannels {
            time_boot_ms: 0,
            channels,
            chancount: 4,
            rssi: 255,
        };
        let rc = RcInput::from(&msg);
        assert_eq!(rc.channels, vec![1500, 1500, 1000, 1500]);
        assert_eq!(rc.rssi, None);
    }

    #[test]
    fn test_rc_raw_stops_at_unused() {
        let msg = RcChannelsRaw {
            time_boot_ms: 0,
            channels: [1100, 1200, u16::MAX, u16::MAX, u16::MAX, u16::MAX, u16::MAX, u16::MAX],
            port: 0,
            rssi: 200,
        };
        let rc = RcInput::from(&msg);
        assert_eq!(rc.channels, vec![1100, 1200]);
        assert_eq!(rc.rssi, Some(200));
    }

    // ==================== Snapshot Tests ====================

    #[test]
    fn test_heartbeat_sets_armed_and_mode() {
        let mut snapshot = VehicleSnapshot::default();
        let heartbeat = Heartbeat {
            custom_mode: 5,
            mav_type: 2,
            autopilot: 3,
            base_mode: 0x80 | 0x01,
            system_status: 4,
            mavlink_version: 3,
        };
        snapshot.apply_heartbeat(&heartbeat);
        assert!(snapshot.armed);
        assert_eq!(snapshot.custom_mode, 5);

        snapshot.apply_heartbeat(&Heartbeat { base_mode: 0x01, ..heartbeat });
        assert!(!snapshot.armed);
    }

    #[test]
    fn test_compass_progress_replaced_per_compass() {
        use crate::calibration::MagCalStatus;

        let mut snapshot = VehicleSnapshot::default();
        let progress = |id, pct| CompassProgress {
            compass_id: id,
            completion_pct: pct,
            attempt: 1,
            status: MagCalStatus::RunningStepOne,
        };
        snapshot.apply_compass_progress(progress(0, 10));
        snapshot.apply_compass_progress(progress(1, 5));
        snapshot.apply_compass_progress(progress(0, 40));

        assert_eq!(snapshot.calibration.compass.len(), 2);
        assert_eq!(snapshot.calibration.compass[0].completion_pct, 40);
    }

    #[test]
    fn test_snapshot_serializes_to_json() {
        let snapshot = VehicleSnapshot::default();
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"phase\":\"Disconnected\""));
    }
}
