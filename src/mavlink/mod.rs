//! # MAVLink Protocol Module
//!
//! Implementation of the MAVLink wire protocol as spoken between a ground
//! station and an ArduPilot flight controller.
//!
//! This module handles:
//! - CRC-16/MCRF4XX checksums with per-message `CRC_EXTRA`
//! - Streaming v1/v2 frame decoding with single-byte resync
//! - v2 frame encoding with payload trimming and sequence numbering
//! - The message catalog (layouts, ids, `CRC_EXTRA` table)

pub mod protocol;
pub mod messages;
pub mod encoder;
pub mod decoder;
pub mod crc;

pub use decoder::{MavlinkParser, ParserStats};
pub use encoder::MavlinkEncoder;
pub use messages::{Message, MessageData};
pub use protocol::{Frame, MavResult, MavlinkVersion, VehicleCategory};
