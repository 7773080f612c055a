//! Sensor packets for the microcontroller's RS485 input table.
//!
//! Each reading becomes one 4-byte packet `[input_id, data_high, data_low, crc8]`.
//! The reading is rescaled into a 12-bit value using the channel's physical
//! domain and packed left-aligned into the two data bytes:
//!
//! ```text
//! data_high = (v >> 4) & 0xFF
//! data_low  = (v & 0x0F) << 4
//! ```
//!
//! The checksum is CRC-8 with polynomial 0x07, initial value 0, no reflection
//! and no final XOR (CRC-8/SMBUS), computed over the first three bytes.

use crc::{Crc, CRC_8_SMBUS};

pub const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

/// Largest 12-bit value.
pub const MAX_12BIT: u16 = 0x0FFF;

pub const PACKET_LEN: usize = 4;

/// Physical range mapped linearly onto `0..=4095`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Domain {
    pub min: f64,
    pub max: f64,
}

pub const TEMPERATURE: Domain = Domain {
    min: -40.0,
    max: 85.0,
};
pub const DEFLECTION: Domain = Domain {
    min: -20.0,
    max: 20.0,
};
pub const PRESSURE: Domain = Domain { min: -1.0, max: 0.6 };

/// Known inputs of the receiving board. Unlisted input ids are raw channels.
pub fn channel_domain(input_id: u8) -> Option<Domain> {
    match input_id {
        0x01 | 0x02 => Some(TEMPERATURE),
        0x03 | 0x05 => Some(DEFLECTION),
        0x04 => Some(PRESSURE),
        _ => None,
    }
}

fn clamp_12bit(value: f64) -> u16 {
    if !value.is_finite() {
        return 0;
    }
    value.round().clamp(0.0, MAX_12BIT as f64) as u16
}

/// `round((value - min) / (max - min) * 4095)`, clamped to `0..=4095`.
pub fn scale_12bit(value: f64, domain: Domain) -> u16 {
    let span = domain.max - domain.min;
    if span <= 0.0 {
        return 0;
    }
    clamp_12bit((value - domain.min) / span * MAX_12BIT as f64)
}

/// Scale `value` for `input_id`, or clamp it unscaled on a raw channel.
pub fn scale_for_input(input_id: u8, value: f64) -> u16 {
    match channel_domain(input_id) {
        Some(domain) => scale_12bit(value, domain),
        None => clamp_12bit(value),
    }
}

pub fn crc8(data: &[u8]) -> u8 {
    CRC8.checksum(data)
}

/// One 4-byte sensor packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorPacket {
    pub input_id: u8,
    /// 12-bit scaled value
    pub value: u16,
}

impl SensorPacket {
    pub fn new(input_id: u8, value: u16) -> Self {
        Self {
            input_id,
            value: value & MAX_12BIT,
        }
    }

    pub fn to_bytes(self) -> [u8; PACKET_LEN] {
        let high = ((self.value >> 4) & 0xFF) as u8;
        let low = ((self.value & 0x0F) << 4) as u8;
        let crc = crc8(&[self.input_id, high, low]);
        [self.input_id, high, low, crc]
    }

    /// Parse and verify a packet as the receiving board would.
    pub fn from_bytes(bytes: [u8; PACKET_LEN]) -> Option<Self> {
        if crc8(&bytes[..3]) != bytes[3] {
            return None;
        }
        let value = ((bytes[1] as u16) << 4) | ((bytes[2] as u16) >> 4);
        Some(Self {
            input_id: bytes[0],
            value,
        })
    }
}
