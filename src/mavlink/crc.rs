//! # CRC-16/MCRF4XX Implementation
//!
//! Checksum used by both MAVLink framing versions (also known as X.25 CRC in
//! MAVLink documentation).
//!
//! **Polynomial**: 0x1021 (reflected, applied as a nibble fold)
//! **Initial Value**: 0xFFFF
//!
//! Every frame checksum ends with one extra accumulation step: the per-message
//! `CRC_EXTRA` byte from the message catalog.

/// Initial accumulator value
pub const CRC_INIT: u16 = 0xFFFF;

/// Fold one byte into the running checksum
///
/// # Arguments
///
/// * `crc` - Current accumulator value
/// * `byte` - Next byte of the covered data
///
/// # Returns
///
/// * `u16` - Updated accumulator
///
/// # Examples
///
/// ```
/// use flight_link::mavlink::crc::{crc_accumulate, CRC_INIT};
///
/// let crc = b"123456789".iter().fold(CRC_INIT, |crc, &b| crc_accumulate(crc, b));
/// assert_eq!(crc, 0x6F91);
/// ```
#[inline]
pub const fn crc_accumulate(crc: u16, byte: u8) -> u16 {
    let mut tmp = byte ^ (crc as u8);
    tmp ^= tmp << 4;
    let tmp = tmp as u16;
    (crc >> 8) ^ (tmp << 8) ^ (tmp << 3) ^ (tmp >> 4)
}

/// Incremental checksum over several discontiguous slices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc16 {
    value: u16,
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc16 {
    /// Start a new accumulator at `CRC_INIT`
    pub const fn new() -> Self {
        Self { value: CRC_INIT }
    }

    /// Fold a slice into the accumulator
    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.value = crc_accumulate(self.value, byte);
        }
    }

    /// Fold a single byte into the accumulator
    pub fn update_byte(&mut self, byte: u8) {
        self.value = crc_accumulate(self.value, byte);
    }

    /// Current checksum value
    pub const fn value(&self) -> u16 {
        self.value
    }
}

/// Calculate the checksum a frame carries
///
/// Covers the header bytes after the start marker, then the payload, then the
/// message's `CRC_EXTRA`.
///
/// # Arguments
///
/// * `header` - Header bytes excluding the start marker
/// * `payload` - Payload bytes exactly as they appear on the wire
/// * `crc_extra` - Catalog constant for the message id
pub fn frame_checksum(header: &[u8], payload: &[u8], crc_extra: u8) -> u16 {
    let mut crc = Crc16::new();
    crc.update(header);
    crc.update(payload);
    crc.update_byte(crc_extra);
    crc.value()
}

/// Bit-at-a-time reference implementation, used only to check the nibble fold
#[cfg(test)]
fn crc_mcrf4xx_slow(data: &[u8]) -> u16 {
    let mut crc = CRC_INIT;

    for &byte in data {
        crc ^= byte as u16;

        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0x8408;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}
