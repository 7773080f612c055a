//! # Uplink Module
//!
//! Inbound side of the bridge: the raw message handed over by the transport,
//! the ChirpStack uplink event model parsed from it, and the decoding steps that
//! turn its `data` field into a canonical payload.
//!
//! - [`topic`] - device identity from the event topic
//! - [`decode`] - base64 / double-hex resolution, size validation, sensor values

pub mod decode;
pub mod topic;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::fmt;

/// One message as received from the transport. Consumed by exactly one
/// pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// ChirpStack v4 uplink event. Only the fields the bridge reads are modelled;
/// everything else in the JSON document is ignored.
///
/// `data` must be a string when present. The other fields are reporting only:
/// a value of an unexpected type reads as `None` instead of failing the parse.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UplinkEvent {
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub device_info: Option<DeviceInfo>,
    #[serde(default, deserialize_with = "lenient")]
    pub f_cnt: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    pub f_port: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    pub rx_info: Option<Vec<RxInfo>>,
    #[serde(default, deserialize_with = "lenient")]
    pub tx_info: Option<TxInfo>,
    /// Codec-decoded payload object, e.g. `{"d": [23.5, 21.0]}`
    #[serde(default)]
    pub object: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(default, deserialize_with = "lenient")]
    pub dev_eui: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub device_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub application_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RxInfo {
    #[serde(default, deserialize_with = "lenient")]
    pub gateway_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub rssi: Option<i32>,
    #[serde(default, deserialize_with = "lenient")]
    pub snr: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub channel: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInfo {
    #[serde(default, deserialize_with = "lenient")]
    pub frequency: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    pub modulation: Option<Modulation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Modulation {
    #[serde(default, deserialize_with = "lenient")]
    pub lora: Option<LoraModulation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoraModulation {
    #[serde(default, deserialize_with = "lenient")]
    pub spreading_factor: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    pub bandwidth: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    pub code_rate: Option<String>,
}

/// Deserialize an optional field, mapping a value of the wrong shape to `None`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

impl UplinkEvent {
    /// Parse an event from the raw MQTT payload.
    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn metadata(&self) -> UplinkMetadata {
        let rx = self.rx_info.as_ref().and_then(|r| r.first());
        let lora = self
            .tx_info
            .as_ref()
            .and_then(|tx| tx.modulation.as_ref())
            .and_then(|m| m.lora.as_ref());
        UplinkMetadata {
            dev_eui: self.device_info.as_ref().and_then(|d| d.dev_eui.clone()),
            f_cnt: self.f_cnt,
            f_port: self.f_port,
            gateway_id: rx.and_then(|r| r.gateway_id.clone()),
            rssi: rx.and_then(|r| r.rssi),
            snr: rx.and_then(|r| r.snr),
            channel: rx.and_then(|r| r.channel),
            frequency: self.tx_info.as_ref().and_then(|tx| tx.frequency),
            spreading_factor: lora.and_then(|l| l.spreading_factor),
            bandwidth: lora.and_then(|l| l.bandwidth),
            code_rate: lora.and_then(|l| l.code_rate.clone()),
        }
    }
}

/// Radio and frame metadata of an uplink, carried for reporting only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UplinkMetadata {
    pub dev_eui: Option<String>,
    pub f_cnt: Option<u32>,
    pub f_port: Option<u32>,
    pub gateway_id: Option<String>,
    pub rssi: Option<i32>,
    pub snr: Option<f64>,
    pub channel: Option<u32>,
    pub frequency: Option<u64>,
    pub spreading_factor: Option<u32>,
    pub bandwidth: Option<u32>,
    pub code_rate: Option<String>,
}

fn field<T: fmt::Display>(value: &Option<T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "n/a".to_string(),
    }
}

impl fmt::Display for UplinkMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "devEui={} fCnt={} fPort={} gw={} rssi={}dBm snr={}dB ch={} freq={} SF{} bw={} cr={}",
            field(&self.dev_eui),
            field(&self.f_cnt),
            field(&self.f_port),
            field(&self.gateway_id),
            field(&self.rssi),
            field(&self.snr),
            field(&self.channel),
            field(&self.frequency),
            field(&self.spreading_factor),
            field(&self.bandwidth),
            field(&self.code_rate),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "deduplicationId": "3ac7e3c4-4401-4b8d-9386-a5c902f9202d",
        "deviceInfo": {"devEui": "0101010101010101", "deviceName": "bridge-sensor", "applicationName": "lab"},
        "fCnt": 42,
        "fPort": 1,
        "data": "3q2+7w==",
        "rxInfo": [{"gatewayId": "0016c001f153a14c", "rssi": -57, "snr": 10.5, "channel": 2}],
        "txInfo": {"frequency": 868100000, "modulation": {"lora": {"bandwidth": 125000, "spreadingFactor": 7, "codeRate": "CR_4_5"}}},
        "object": {"d": [21.5, 22.0]}
    }"#;

    #[test]
    fn parses_chirpstack_uplink() {
        let event = UplinkEvent::from_slice(SAMPLE.as_bytes()).unwrap();
        assert_eq!(event.data.as_deref(), Some("3q2+7w=="));
        let meta = event.metadata();
        assert_eq!(meta.dev_eui.as_deref(), Some("0101010101010101"));
        assert_eq!(meta.f_cnt, Some(42));
        assert_eq!(meta.rssi, Some(-57));
        assert_eq!(meta.snr, Some(10.5));
        assert_eq!(meta.frequency, Some(868_100_000));
        assert_eq!(meta.spreading_factor, Some(7));
        assert_eq!(meta.code_rate.as_deref(), Some("CR_4_5"));
    }

    #[test]
    fn minimal_event_has_empty_metadata() {
        let event = UplinkEvent::from_slice(br#"{"data": "AQ=="}"#).unwrap();
        assert_eq!(event.metadata(), UplinkMetadata::default());
        let text = event.metadata().to_string();
        assert!(text.contains("devEui=n/a"));
    }

    #[test]
    fn mistyped_metadata_reads_as_missing() {
        let event = UplinkEvent::from_slice(
            br#"{
                "data": "AQ==",
                "fCnt": "17",
                "deviceInfo": {"devEui": 1234},
                "rxInfo": [{"gatewayId": "gw1", "rssi": -61.5, "channel": "two"}],
                "txInfo": {"frequency": -1, "modulation": {"lora": {"bandwidth": 125.5, "spreadingFactor": 9}}}
            }"#,
        )
        .unwrap();
        assert_eq!(event.data.as_deref(), Some("AQ=="));
        let meta = event.metadata();
        assert_eq!(meta.f_cnt, None);
        assert_eq!(meta.dev_eui, None);
        assert_eq!(meta.gateway_id.as_deref(), Some("gw1"));
        assert_eq!(meta.rssi, None);
        assert_eq!(meta.channel, None);
        assert_eq!(meta.frequency, None);
        assert_eq!(meta.bandwidth, None);
        assert_eq!(meta.spreading_factor, Some(9));
    }

    #[test]
    fn rx_info_of_the_wrong_shape_is_ignored() {
        let event = UplinkEvent::from_slice(br#"{"data": "AQ==", "rxInfo": {"rssi": -40}}"#).unwrap();
        assert_eq!(event.metadata().rssi, None);
    }

    #[test]
    fn non_string_data_is_rejected() {
        assert!(UplinkEvent::from_slice(br#"{"data": 42}"#).is_err());
    }

    #[test]
    fn rejects_non_json_payload() {
        assert!(UplinkEvent::from_slice(b"not json").is_err());
    }
}
