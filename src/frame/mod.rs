//! # Frame Module
//!
//! Builds the byte sequence written to the serial peer for one uplink. A
//! deployment picks one [`FrameFormat`] in its configuration:
//!
//! | format            | layout                                                  |
//! |-------------------|---------------------------------------------------------|
//! | `prefixed-binary` | `"{device}: "` followed by the payload bytes verbatim    |
//! | `hex-line`        | `"{device}:{lowercase hex payload}\n"`                   |
//! | `sensor-packets`  | one `[input_id, hi, lo, crc8]` packet per sensor reading |
//!
//! The prefixed-binary receiver splits on the first `": "`, so a device identity
//! containing that sequence is refused. The hex-line receiver tokenizes on `:`
//! and `\n`, which are refused in identities for that format.

pub mod sensor;

use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::uplink::decode::{sensor_values, CanonicalPayload};
use crate::uplink::UplinkEvent;
use sensor::{scale_for_input, SensorPacket, PACKET_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameFormat {
    #[default]
    PrefixedBinary,
    HexLine,
    SensorPackets,
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameFormat::PrefixedBinary => "prefixed-binary",
            FrameFormat::HexLine => "hex-line",
            FrameFormat::SensorPackets => "sensor-packets",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("device identity {identity:?} collides with the {format} delimiter")]
    AmbiguousIdentity {
        identity: String,
        format: FrameFormat,
    },

    #[error("uplink carries no numeric sensor values")]
    NoSensorValues,
}

/// A finished frame. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    format: FrameFormat,
    bytes: Vec<u8>,
}

impl Frame {
    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// `"{identity}: "` followed by the payload bytes.
pub fn build_prefixed_binary(identity: &str, payload: &[u8]) -> Result<Frame, FrameError> {
    if identity.contains(": ") {
        return Err(FrameError::AmbiguousIdentity {
            identity: identity.to_string(),
            format: FrameFormat::PrefixedBinary,
        });
    }
    let mut bytes = Vec::with_capacity(identity.len() + 2 + payload.len());
    bytes.extend_from_slice(identity.as_bytes());
    bytes.extend_from_slice(b": ");
    bytes.extend_from_slice(payload);
    Ok(Frame {
        format: FrameFormat::PrefixedBinary,
        bytes,
    })
}

/// `"{identity}:{hex}\n"` with lowercase hex.
pub fn build_hex_line(identity: &str, payload: &[u8]) -> Result<Frame, FrameError> {
    if identity.contains(':') || identity.contains('\n') {
        return Err(FrameError::AmbiguousIdentity {
            identity: identity.to_string(),
            format: FrameFormat::HexLine,
        });
    }
    let line = format!("{}:{}\n", identity, hex::encode(payload));
    Ok(Frame {
        format: FrameFormat::HexLine,
        bytes: line.into_bytes(),
    })
}

/// One packet per numeric reading, input ids counted from 1 by position.
/// Non-numeric readings are skipped but keep their position.
pub fn build_sensor_packets(values: &[Option<f64>]) -> Result<Frame, FrameError> {
    let mut bytes = Vec::with_capacity(values.len() * PACKET_LEN);
    for (index, value) in values.iter().enumerate() {
        let Ok(input_id) = u8::try_from(index + 1) else {
            warn!("Sensor array longer than 255 entries; ignoring the rest");
            break;
        };
        let Some(value) = value else {
            warn!("Non-numeric sensor value at index {}, skipped", index);
            continue;
        };
        let packet = SensorPacket::new(input_id, scale_for_input(input_id, *value));
        bytes.extend_from_slice(&packet.to_bytes());
    }
    if bytes.is_empty() {
        return Err(FrameError::NoSensorValues);
    }
    Ok(Frame {
        format: FrameFormat::SensorPackets,
        bytes,
    })
}

/// Builds frames in the configured format.
#[derive(Debug, Clone, Copy)]
pub struct FrameBuilder {
    format: FrameFormat,
}

impl FrameBuilder {
    pub fn new(format: FrameFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn build(
        &self,
        identity: &str,
        event: &UplinkEvent,
        payload: &CanonicalPayload,
    ) -> Result<Frame, FrameError> {
        match self.format {
            FrameFormat::PrefixedBinary => build_prefixed_binary(identity, &payload.bytes),
            FrameFormat::HexLine => build_hex_line(identity, &payload.bytes),
            FrameFormat::SensorPackets => {
                let values = sensor_values(event, payload).ok_or(FrameError::NoSensorValues)?;
                build_sensor_packets(&values)
            }
        }
    }
}
