//! # Configuration Management Module
//!
//! Typed configuration for the bridge, loaded from TOML (or JSON when the file
//! name ends in `.json`, which keeps older `config.json` deployments working).
//!
//! ## Configuration Structure
//!
//! - [`MqttConfig`] - broker connection and subscription filter
//! - [`UartConfig`] - serial port parameters and payload size limit
//! - [`LoggingConfig`] - log level and rotating log file
//! - [`SystemConfig`] - retry policy, statistics interval, frame format
//!
//! Every field has a default, so a partial file is completed from defaults and
//! a missing or broken file falls back to [`Config::default`] through
//! [`Config::load_or_default`].
//!
//! ## Configuration File Format
//!
//! ```toml
//! [mqtt]
//! broker = "localhost"
//! port = 1883
//! topic = "application/+/device/+/event/up"
//!
//! [uart]
//! port = "/dev/ttyAMA0"
//! baudrate = 115200
//! max_payload_size = 255
//!
//! [system]
//! retry_attempts = 3
//! retry_delay = 0.5
//! frame_format = "prefixed-binary"
//! ```

use anyhow::{anyhow, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::frame::FrameFormat;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub uart: UartConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub system: SystemConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Subscription filter, e.g. `application/+/device/+/event/up`
    pub topic: String,
    pub keepalive: u64, // seconds
    pub reconnect_delay_min: u64,
    pub reconnect_delay_max: u64,
    pub client_id: String,
    /// Capacity of the bounded queue between the transport and the dispatcher
    pub queue_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            topic: "application/+/device/+/event/up".to_string(),
            keepalive: 60,
            reconnect_delay_min: 1,
            reconnect_delay_max: 120,
            client_id: "lorabridge".to_string(),
            queue_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UartConfig {
    pub port: String,
    pub baudrate: u32,
    pub bytesize: u8,
    /// One of "none", "even", "odd"
    pub parity: String,
    pub stopbits: u8,
    /// Read/write timeout in seconds
    pub timeout: f64,
    pub xonxoff: bool,
    pub rtscts: bool,
    pub dsrdtr: bool,
    pub max_payload_size: usize,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyAMA0".to_string(),
            baudrate: 115200,
            bytesize: 8,
            parity: "none".to_string(),
            stopbits: 1,
            timeout: 1.0,
            xonxoff: false,
            rtscts: false,
            dsrdtr: false,
            max_payload_size: 255,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Rotation threshold such as "10MB", "512KB" or a plain byte count
    pub max_file_size: String,
    pub backup_count: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("lorabridge.log".to_string()),
            max_file_size: "10MB".to_string(),
            backup_count: 5,
        }
    }
}

impl LoggingConfig {
    /// Parse `max_file_size` into bytes. Unparsable values fall back to 10 MB.
    pub fn max_file_bytes(&self) -> u64 {
        const DEFAULT: u64 = 10 * 1024 * 1024;
        let raw = self.max_file_size.trim().to_ascii_uppercase();
        let (digits, multiplier) = if let Some(n) = raw.strip_suffix("GB") {
            (n, 1024 * 1024 * 1024)
        } else if let Some(n) = raw.strip_suffix("MB") {
            (n, 1024 * 1024)
        } else if let Some(n) = raw.strip_suffix("KB") {
            (n, 1024)
        } else if let Some(n) = raw.strip_suffix('B') {
            (n, 1)
        } else {
            (raw.as_str(), 1)
        };
        match digits.trim().parse::<u64>() {
            Ok(n) if n > 0 => n.saturating_mul(multiplier),
            _ => DEFAULT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Seconds between periodic statistics log lines (0 disables them)
    pub stats_interval: u64,
    pub retry_attempts: u32,
    /// Seconds to wait between delivery attempts
    pub retry_delay: f64,
    /// Seconds to wait for the in-flight delivery when shutting down
    pub graceful_shutdown_timeout: u64,
    pub frame_format: FrameFormat,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            stats_interval: 300,
            retry_attempts: 3,
            retry_delay: 0.5,
            graceful_shutdown_timeout: 5,
            frame_format: FrameFormat::PrefixedBinary,
        }
    }
}

fn secs_f64(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

impl Config {
    /// Load configuration from a file, failing on missing or malformed input.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        Self::parse(path, &content)
    }

    /// Load configuration, falling back to a complete default configuration
    /// when the file is missing or cannot be parsed.
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load(path).await {
            Ok(config) => {
                info!("Configuration loaded from {}", path);
                config
            }
            Err(e) => {
                warn!("{}; using default configuration", e);
                Config::default()
            }
        }
    }

    fn parse(path: &str, content: &str) -> Result<Self> {
        let is_json = Path::new(path)
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let config = if is_json {
            serde_json::from_str(content)
                .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?
        } else {
            toml::from_str(content)
                .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?
        };
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Number of delivery attempts per frame; never less than one.
    pub fn retry_attempts(&self) -> u32 {
        self.system.retry_attempts.max(1)
    }

    pub fn retry_delay(&self) -> Duration {
        secs_f64(self.system.retry_delay)
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        match self.system.stats_interval {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.system.graceful_shutdown_timeout)
    }

    pub fn uart_timeout(&self) -> Duration {
        secs_f64(self.uart.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.uart.max_payload_size, 255);
        assert_eq!(config.system.retry_attempts, 3);
        assert_eq!(config.retry_delay(), Duration::from_millis(500));
        assert_eq!(config.mqtt.topic, "application/+/device/+/event/up");
        assert_eq!(config.system.frame_format, FrameFormat::PrefixedBinary);
    }

    #[test]
    fn partial_toml_is_completed_from_defaults() {
        let toml_text = r#"
            [uart]
            port = "/dev/ttyUSB1"

            [system]
            retry_attempts = 5
            frame_format = "hex-line"
        "#;
        let config = Config::parse("bridge.toml", toml_text).unwrap();
        assert_eq!(config.uart.port, "/dev/ttyUSB1");
        assert_eq!(config.uart.baudrate, 115200);
        assert_eq!(config.system.retry_attempts, 5);
        assert_eq!(config.system.frame_format, FrameFormat::HexLine);
        assert_eq!(config.mqtt.port, 1883);
    }

    #[test]
    fn json_config_is_accepted_by_extension() {
        let json_text = r#"{"uart": {"max_payload_size": 64}, "system": {"retry_delay": 0.25}}"#;
        let config = Config::parse("config.json", json_text).unwrap();
        assert_eq!(config.uart.max_payload_size, 64);
        assert_eq!(config.retry_delay(), Duration::from_millis(250));
    }

    #[test]
    fn zero_retry_attempts_still_tries_once() {
        let mut config = Config::default();
        config.system.retry_attempts = 0;
        assert_eq!(config.retry_attempts(), 1);
    }

    #[test]
    fn max_file_size_parsing() {
        let mut logging = LoggingConfig::default();
        assert_eq!(logging.max_file_bytes(), 10 * 1024 * 1024);
        logging.max_file_size = "512KB".to_string();
        assert_eq!(logging.max_file_bytes(), 512 * 1024);
        logging.max_file_size = "4096".to_string();
        assert_eq!(logging.max_file_bytes(), 4096);
        logging.max_file_size = "lots".to_string();
        assert_eq!(logging.max_file_bytes(), 10 * 1024 * 1024);
    }

    #[test]
    fn stats_interval_zero_disables_reporting() {
        let mut config = Config::default();
        assert_eq!(config.stats_interval(), Some(Duration::from_secs(300)));
        config.system.stats_interval = 0;
        assert_eq!(config.stats_interval(), None);
    }
}
