//! Payload decoding for ChirpStack uplinks.
//!
//! The `data` field of an uplink is base64. Some senders hex-encode their
//! payload as ASCII text before handing it to the network server, so the
//! base64 layer then carries the hex text instead of the real bytes. After the
//! base64 pass, a payload that is entirely ASCII hex digits is unwrapped once
//! more. This is a heuristic: a genuine binary payload that happens to consist
//! only of the bytes `0-9a-fA-F` is unwrapped as well.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use log::{debug, warn};
use serde_json::Value;

use super::UplinkEvent;
use crate::logutil::hex_snippet;

/// Standard alphabet, padding optional on input.
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("uplink is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("uplink carries no data field")]
    MissingData,

    #[error("payload is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("payload size {len} outside 1..={max} bytes")]
    EmptyOrOversizePayload { len: usize, max: usize },
}

/// Decoded payload bytes ready for framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalPayload {
    pub bytes: Vec<u8>,
    /// True when the base64 output was ASCII hex and got decoded a second time.
    pub hex_unwrapped: bool,
}

impl CanonicalPayload {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Base64-decode `raw` and resolve a possible second hex layer.
pub fn decode(raw: &[u8]) -> Result<CanonicalPayload, DecodeError> {
    let trimmed = raw.trim_ascii();
    let decoded = BASE64.decode(trimmed)?;
    debug!("Base64 decoded ({} bytes)", decoded.len());
    Ok(unwrap_double_encoding(decoded))
}

/// Decode the `data` field of a parsed uplink event.
pub fn decode_event(event: &UplinkEvent) -> Result<CanonicalPayload, DecodeError> {
    match event.data.as_deref() {
        Some(data) => decode(data.as_bytes()),
        None => Err(DecodeError::MissingData),
    }
}

fn unwrap_double_encoding(decoded: Vec<u8>) -> CanonicalPayload {
    let all_hex = !decoded.is_empty() && decoded.iter().all(u8::is_ascii_hexdigit);
    if all_hex {
        // Odd-length hex text cannot be unwrapped; keep the bytes as they are.
        if let Ok(inner) = hex::decode(&decoded) {
            debug!(
                "ASCII hex payload detected, unwrapped to {} bytes: {}",
                inner.len(),
                hex_snippet(&inner, 32)
            );
            return CanonicalPayload {
                bytes: inner,
                hex_unwrapped: true,
            };
        }
    }
    debug!(
        "Direct payload ({} bytes): {}",
        decoded.len(),
        hex_snippet(&decoded, 32)
    );
    CanonicalPayload {
        bytes: decoded,
        hex_unwrapped: false,
    }
}

/// Accept payloads of 1..=`max_size` bytes.
pub fn validate(payload: &CanonicalPayload, max_size: usize) -> bool {
    if payload.is_empty() {
        warn!("Empty payload received");
        return false;
    }
    if payload.len() > max_size {
        warn!(
            "Payload too large: {} bytes (max: {})",
            payload.len(),
            max_size
        );
        return false;
    }
    true
}

/// [`validate`] as a `Result`, for use with `?`.
pub fn ensure_valid(payload: &CanonicalPayload, max_size: usize) -> Result<(), DecodeError> {
    if validate(payload, max_size) {
        Ok(())
    } else {
        Err(DecodeError::EmptyOrOversizePayload {
            len: payload.len(),
            max: max_size,
        })
    }
}

/// Sensor readings for the packet-set frame format.
///
/// Prefers the codec-decoded `object.d` array of the event; otherwise the
/// canonical payload is read as a JSON document with a `d` array. Positions are
/// preserved: a non-numeric entry yields `None` at its index. Returns `None`
/// when neither source has a `d` array.
pub fn sensor_values(event: &UplinkEvent, payload: &CanonicalPayload) -> Option<Vec<Option<f64>>> {
    if let Some(values) = event.object.as_ref().and_then(d_array) {
        return Some(values);
    }
    let parsed: Value = serde_json::from_slice(&payload.bytes).ok()?;
    d_array(&parsed)
}

fn d_array(value: &Value) -> Option<Vec<Option<f64>>> {
    let items = value.get("d")?.as_array()?;
    Some(items.iter().map(Value::as_f64).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(bytes: &[u8]) -> Vec<u8> {
        base64::engine::general_purpose::STANDARD
            .encode(bytes)
            .into_bytes()
    }

    fn varied_bytes(len: usize, seed: u32) -> Vec<u8> {
        let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                (state >> 16) as u8
            })
            .collect()
    }

    fn assert_round_trips(bytes: &[u8]) {
        use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
        assert_eq!(hex::decode(hex::encode(bytes)).unwrap(), bytes);
        assert_eq!(BASE64.decode(STANDARD.encode(bytes)).unwrap(), bytes);
        assert_eq!(BASE64.decode(STANDARD_NO_PAD.encode(bytes)).unwrap(), bytes);
    }

    #[test]
    fn hex_and_base64_round_trip_every_byte() {
        for b in 0..=255u8 {
            assert_round_trips(&[b]);
        }
        let all: Vec<u8> = (0..=255u8).collect();
        assert_round_trips(&all);
    }

    #[test]
    fn hex_and_base64_round_trip_all_lengths() {
        for len in 0..=300 {
            assert_round_trips(&varied_bytes(len, len as u32));
            assert_round_trips(&vec![0xFF; len]);
            assert_round_trips(&vec![0x00; len]);
        }
    }

    #[test]
    fn plain_binary_passes_through() {
        let raw = b64(&[0xDE, 0xAD, 0xBE, 0xEF]);
        let payload = decode(&raw).unwrap();
        assert_eq!(payload.bytes, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(!payload.hex_unwrapped);
    }

    #[test]
    fn ascii_hex_is_unwrapped() {
        let payload = decode(b"NDg2NTZjNmM2Zg==").unwrap();
        assert_eq!(payload.bytes, b"Hello".to_vec());
        assert!(payload.hex_unwrapped);
    }

    #[test]
    fn mixed_case_hex_is_unwrapped() {
        let payload = decode(&b64(b"CAfe01")).unwrap();
        assert_eq!(payload.bytes, vec![0xCA, 0xFE, 0x01]);
    }

    #[test]
    fn non_hex_ascii_is_kept() {
        let payload = decode(&b64(b"xyz")).unwrap();
        assert_eq!(payload.bytes, b"xyz".to_vec());
        assert!(!payload.hex_unwrapped);
    }

    #[test]
    fn odd_length_hex_text_is_kept() {
        let payload = decode(&b64(b"abc")).unwrap();
        assert_eq!(payload.bytes, b"abc".to_vec());
        assert!(!payload.hex_unwrapped);
    }

    #[test]
    fn non_ascii_bytes_are_kept() {
        let payload = decode(&b64(&[0x31, 0x32, 0xC3])).unwrap();
        assert_eq!(payload.bytes, vec![0x31, 0x32, 0xC3]);
    }

    #[test]
    fn unpadded_and_whitespace_input_accepted() {
        assert_eq!(decode(b"eHl6").unwrap().bytes, b"xyz".to_vec());
        assert_eq!(decode(b"  AQI \n").unwrap().bytes, vec![1, 2]);
    }

    #[test]
    fn malformed_base64_is_rejected() {
        assert!(matches!(
            decode(b"!!not-base64!!"),
            Err(DecodeError::InvalidBase64(_))
        ));
    }

    #[test]
    fn missing_data_field() {
        let event = UplinkEvent::default();
        assert!(matches!(decode_event(&event), Err(DecodeError::MissingData)));
    }

    #[test]
    fn validate_bounds() {
        let max = 255;
        let make = |n: usize| CanonicalPayload {
            bytes: vec![0x55; n],
            hex_unwrapped: false,
        };
        assert!(!validate(&make(0), max));
        assert!(validate(&make(1), max));
        assert!(validate(&make(max), max));
        assert!(!validate(&make(max + 1), max));
        assert!(matches!(
            ensure_valid(&make(max + 1), max),
            Err(DecodeError::EmptyOrOversizePayload { len: 256, max: 255 })
        ));
    }

    #[test]
    fn sensor_values_prefer_object_d() {
        let event: UplinkEvent =
            serde_json::from_str(r#"{"object": {"d": [23.5, "x", -40]}}"#).unwrap();
        let payload = CanonicalPayload {
            bytes: br#"{"d": [1.0]}"#.to_vec(),
            hex_unwrapped: false,
        };
        assert_eq!(
            sensor_values(&event, &payload),
            Some(vec![Some(23.5), None, Some(-40.0)])
        );
    }

    #[test]
    fn sensor_values_fall_back_to_payload_json() {
        let event = UplinkEvent::default();
        let payload = CanonicalPayload {
            bytes: br#"{"d":[1.5,2.5],"id":"n1"}"#.to_vec(),
            hex_unwrapped: false,
        };
        assert_eq!(
            sensor_values(&event, &payload),
            Some(vec![Some(1.5), Some(2.5)])
        );
        let binary = CanonicalPayload {
            bytes: vec![0xFF, 0x00],
            hex_unwrapped: false,
        };
        assert_eq!(sensor_values(&event, &binary), None);
    }
}
