//! Device identity extraction from ChirpStack event topics.
//!
//! Topics have the shape `application/{appId}/device/{deviceId}/event/{eventType}`;
//! the device identity is the segment at index 3.

/// Identity used when a topic is too short to carry a device segment.
pub const UNKNOWN_DEVICE: &str = "unknown";

const DEVICE_SEGMENT: usize = 3;

/// Return the fourth `/`-separated segment of `topic`, or [`UNKNOWN_DEVICE`]
/// when the topic has fewer than four segments. Never fails.
///
/// ```
/// use lorabridge::uplink::topic::extract_device_identity;
///
/// assert_eq!(
///     extract_device_identity("application/1/device/aabbccddeeff0011/event/up"),
///     "aabbccddeeff0011"
/// );
/// assert_eq!(extract_device_identity("application/1/device"), "unknown");
/// ```
pub fn extract_device_identity(topic: &str) -> String {
    topic
        .split('/')
        .nth(DEVICE_SEGMENT)
        .unwrap_or(UNKNOWN_DEVICE)
        .to_string()
}
