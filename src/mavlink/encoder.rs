//! # MAVLink Frame Encoder
//!
//! Serializes outgoing messages as MAVLink 2 frames.

use super::crc::frame_checksum;
use super::messages::{crc_extra, Message, MessageData};
use super::protocol::*;
use crate::error::{FlightLinkError, Result};

/// Outgoing frame builder
///
/// Owns the outgoing sequence counter. A fresh encoder (or
/// [`reset_sequence`](Self::reset_sequence)) starts numbering at 0.
#[derive(Debug, Clone)]
pub struct MavlinkEncoder {
    sequence: u8,
    system_id: u8,
    component_id: u8,
}

impl Default for MavlinkEncoder {
    fn default() -> Self {
        Self::new(GCS_SYSTEM_ID, GCS_COMPONENT_ID)
    }
}

impl MavlinkEncoder {
    /// Create an encoder sending as `system_id`/`component_id`
    pub fn new(system_id: u8, component_id: u8) -> Self {
        Self {
            sequence: 0,
            system_id,
            component_id,
        }
    }

    /// Sequence number the next frame will carry
    pub fn next_sequence(&self) -> u8 {
        self.sequence
    }

    /// Restart numbering at 0
    pub fn reset_sequence(&mut self) {
        self.sequence = 0;
    }

    /// Encode a catalog message with the default sender identity
    ///
    /// # Examples
    ///
    /// ```
    /// use flight_link::mavlink::encoder::MavlinkEncoder;
    /// use flight_link::mavlink::messages::ParamRequestList;
    ///
    /// let mut encoder = MavlinkEncoder::default();
    /// let frame = encoder.encode(&ParamRequestList { target_system: 1, target_component: 1 });
    /// assert_eq!(frame[0], 0xFD);
    /// assert_eq!(frame.len(), 10 + 2 + 2);
    /// ```
    pub fn encode<M: MessageData>(&mut self, message: &M) -> Vec<u8> {
        let (system_id, component_id) = (self.system_id, self.component_id);
        self.encode_as(message, system_id, component_id)
    }

    /// Encode a catalog message with an overridden sender identity
    pub fn encode_as<M: MessageData>(&mut self, message: &M, system_id: u8, component_id: u8) -> Vec<u8> {
        let payload = message.to_payload();
        self.build(M::ID, &payload, M::CRC_EXTRA, system_id, component_id)
    }

    /// Encode a decoded [`Message`]
    ///
    /// # Errors
    ///
    /// Returns error if the id has no known `CRC_EXTRA` or the payload is
    /// longer than 255 bytes
    pub fn encode_message(&mut self, message: &Message) -> Result<Vec<u8>> {
        let id = message.message_id();
        let extra = crc_extra(id)
            .ok_or_else(|| FlightLinkError::Protocol(format!("No CRC_EXTRA for message id {}", id)))?;
        let payload = message.payload();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(FlightLinkError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                payload.len(),
                MAX_PAYLOAD_LEN
            )));
        }
        Ok(self.encode_raw(id, &payload, extra))
    }

    /// Encode raw payload bytes for any id with a caller-supplied `CRC_EXTRA`
    ///
    /// Payloads longer than 255 bytes are truncated.
    pub fn encode_raw(&mut self, message_id: u32, payload: &[u8], crc_extra: u8) -> Vec<u8> {
        let payload = &payload[..payload.len().min(MAX_PAYLOAD_LEN)];
        let (system_id, component_id) = (self.system_id, self.component_id);
        self.build(message_id, payload, crc_extra, system_id, component_id)
    }

    fn build(&mut self, message_id: u32, payload: &[u8], crc_extra: u8, system_id: u8, component_id: u8) -> Vec<u8> {
        let trimmed = trim_payload(payload);
        let id = message_id.to_le_bytes();

        let header = [
            trimmed.len() as u8,
            0, // incompat_flags
            0, // compat_flags
            self.sequence,
            system_id,
            component_id,
            id[0],
            id[1],
            id[2],
        ];
        self.sequence = self.sequence.wrapping_add(1);

        let crc = frame_checksum(&header, trimmed, crc_extra);

        let mut frame = Vec::with_capacity(HEADER_LEN_V2 + trimmed.len() + CHECKSUM_LEN);
        frame.push(MAVLINK_STX_V2);
        frame.extend_from_slice(&header);
        frame.extend_from_slice(trimmed);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }
}

/// Strip trailing zero bytes, keeping at least one byte
fn trim_payload(payload: &[u8]) -> &[u8] {
    const ZERO: &[u8] = &[0];

    if payload.is_empty() {
        return ZERO;
    }
    let len = payload.iter().rposition(|&b| b != 0).map_or(1, |last| last + 1);
    &payload[..len]
}
