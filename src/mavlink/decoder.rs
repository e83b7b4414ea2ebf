//! # MAVLink Stream Decoder
//!
//! Turns an unbounded byte stream into checksum-validated frames.
//!
//! The decoder tolerates line noise, frames split across reads and mixed v1/v2
//! traffic. On a checksum mismatch only the start marker is dropped, since the
//! length byte of a corrupted frame cannot be trusted.

use bytes::{Buf, BytesMut};
use serde::Serialize;
use tracing::trace;

use super::crc::frame_checksum;
use super::messages::crc_extra;
use super::protocol::*;

/// Initial receive buffer capacity; grows on demand
const INITIAL_BUFFER_CAPACITY: usize = 512;

/// Decoder diagnostic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParserStats {
    /// Accepted MAVLink 1 frames
    pub v1_frames: u64,
    /// Accepted MAVLink 2 frames
    pub v2_frames: u64,
    /// Frames rejected by checksum
    pub checksum_failures: u64,
    /// Raw bytes pushed into the decoder
    pub bytes_processed: u64,
}

/// Result of one extraction attempt at the head of the buffer
enum Extraction {
    NeedMore,
    Frame(Frame),
    BadChecksum,
}

/// Streaming MAVLink decoder
#[derive(Debug)]
pub struct MavlinkParser {
    buffer: BytesMut,
    stats: ParserStats,
}

impl Default for MavlinkParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MavlinkParser {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            stats: ParserStats::default(),
        }
    }

    /// Feed bytes and emit every frame that becomes complete
    ///
    /// # Arguments
    ///
    /// * `data` - Bytes as read from the transport (any length, any alignment)
    /// * `on_frame` - Called once per accepted frame, in stream order
    ///
    /// # Examples
    ///
    /// ```
    /// use flight_link::mavlink::decoder::MavlinkParser;
    /// use flight_link::mavlink::encoder::MavlinkEncoder;
    /// use flight_link::mavlink::messages::Heartbeat;
    ///
    /// let mut encoder = MavlinkEncoder::default();
    /// let bytes = encoder.encode(&Heartbeat::ground_station());
    ///
    /// let mut parser = MavlinkParser::new();
    /// let mut frames = Vec::new();
    /// parser.push(&bytes, |frame| frames.push(frame));
    /// assert_eq!(frames.len(), 1);
    /// ```
    pub fn push<F>(&mut self, data: &[u8], mut on_frame: F)
    where
        F: FnMut(Frame),
    {
        self.stats.bytes_processed += data.len() as u64;
        self.buffer.extend_from_slice(data);

        loop {
            if !self.resync() {
                return;
            }

            match self.extract() {
                Extraction::NeedMore => return,
                Extraction::Frame(frame) => on_frame(frame),
                Extraction::BadChecksum => {
                    self.stats.checksum_failures += 1;
                    self.buffer.advance(1);
                }
            }
        }
    }

    /// Feed bytes and collect the emitted frames
    pub fn push_collect(&mut self, data: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        self.push(data, |frame| frames.push(frame));
        frames
    }

    /// Diagnostic counters since the last reset
    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    /// Bytes currently held waiting for the rest of a frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop buffered bytes and zero the counters
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.stats = ParserStats::default();
    }

    /// Discard bytes ahead of the first start marker
    ///
    /// Returns `false` when no marker is buffered; the whole buffer is dropped.
    fn resync(&mut self) -> bool {
        match self
            .buffer
            .iter()
            .position(|&b| MavlinkVersion::from_start_marker(b).is_some())
        {
            Some(0) => true,
            Some(pos) => {
                trace!("Discarding {} bytes before start marker", pos);
                self.buffer.advance(pos);
                true
            }
            None => {
                if !self.buffer.is_empty() {
                    trace!("Discarding {} bytes without start marker", self.buffer.len());
                }
                self.buffer.clear();
                false
            }
        }
    }

    /// Try to take one frame from the head of the buffer (head is a marker)
    fn extract(&mut self) -> Extraction {
        let Some(version) = self.buffer.first().and_then(|&b| MavlinkVersion::from_start_marker(b)) else {
            return Extraction::NeedMore;
        };

        let header_len = version.header_len();
        if self.buffer.len() < header_len {
            return Extraction::NeedMore;
        }

        let payload_len = self.buffer[1] as usize;
        let total = header_len + payload_len + CHECKSUM_LEN;
        if self.buffer.len() < total {
            return Extraction::NeedMore;
        }

        let buf = &self.buffer[..total];
        let (sequence, system_id, component_id, message_id) = match version {
            MavlinkVersion::V1 => (buf[2], buf[3], buf[4], buf[5] as u32),
            MavlinkVersion::V2 => (
                buf[4],
                buf[5],
                buf[6],
                u32::from_le_bytes([buf[7], buf[8], buf[9], 0]),
            ),
        };

        let payload = &buf[header_len..header_len + payload_len];
        let checksum = u16::from_le_bytes([buf[total - 2], buf[total - 1]]);

        if let Some(extra) = crc_extra(message_id) {
            let expected = frame_checksum(&buf[1..header_len], payload, extra);
            if expected != checksum {
                trace!(
                    "Checksum mismatch for msg {}: expected {:#06x}, got {:#06x}",
                    message_id,
                    expected,
                    checksum
                );
                return Extraction::BadChecksum;
            }
        }

        let frame = Frame {
            version,
            sequence,
            system_id,
            component_id,
            message_id,
            payload: payload.to_vec(),
            checksum,
        };

        match version {
            MavlinkVersion::V1 => self.stats.v1_frames += 1,
            MavlinkVersion::V2 => self.stats.v2_frames += 1,
        }
        self.buffer.advance(total);

        Extraction::Frame(frame)
    }
}
