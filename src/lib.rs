//! # lorabridge - ChirpStack uplinks to a serial microcontroller
//!
//! lorabridge subscribes to LoRaWAN uplink events published by a ChirpStack
//! network server over MQTT and forwards each payload to a microcontroller on a
//! UART link, one frame per uplink.
//!
//! ## Pipeline
//!
//! Every inbound message goes through the same steps, one message at a time:
//!
//! ```text
//! MQTT publish ──► bounded queue ──► Dispatcher
//!                                      │ topic   → device identity
//!                                      │ decode  → base64, then ASCII-hex unwrap
//!                                      │ validate→ 1..=max_payload_size bytes
//!                                      │ frame   → prefixed-binary | hex-line | sensor-packets
//!                                      ▼
//!                                   DeliveryManager ──► serial link (retry + reopen)
//! ```
//!
//! A failure at any step is counted and logged, and the message is dropped;
//! the next message is unaffected. Frames are never queued for a later retry.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lorabridge::bridge::Bridge;
//! use lorabridge::config::Config;
//! use lorabridge::serial::SerialConnector;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_or_default("config.toml").await;
//!     let connector = SerialConnector::new(config.uart.clone(), config.uart_timeout());
//!     Bridge::new(config, Box::new(connector)).run().await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - configuration model and defaults
//! - [`uplink`] - inbound messages, uplink event model, topic parsing, payload decoding
//! - [`frame`] - wire frame formats, sensor packet scaling and CRC-8
//! - [`serial`] - link ownership, delivery with bounded retries
//! - [`bridge`] - dispatcher, statistics, runtime and shutdown handling
//! - [`mqtt`] - broker subscription feeding the inbound queue
//! - [`logutil`] - log escaping, hex previews, rotating log file

pub mod bridge;
pub mod config;
pub mod frame;
pub mod logutil;
pub mod mqtt;
pub mod serial;
pub mod shutdown;
pub mod uplink;
