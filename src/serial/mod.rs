//! # Serial Delivery Module
//!
//! Writes finished frames to the downstream microcontroller. The
//! [`DeliveryManager`] owns the link handle exclusively: nothing else opens,
//! writes or closes it.
//!
//! One call to [`DeliveryManager::deliver`] walks this state machine:
//!
//! ```text
//! Idle -> Attempting -> Success
//!              |
//!              v
//!          RetryWait -> Attempting -> ... -> Exhausted
//! ```
//!
//! An attempt opens the link first if it is not open. A write must report the
//! full frame length; a short write is retried on the same link, while an I/O
//! error drops the link so that the next attempt reopens it with the same
//! parameters. Shutdown is observed only while waiting between attempts; a
//! sequence cut short that way ends `interrupted` instead of `Exhausted`.
//!
//! Opening is behind the [`LinkConnector`] trait so the pipeline runs against
//! [`SerialConnector`] in production and [`memory::ScriptedConnector`] in
//! tests.

pub mod memory;

use log::{debug, info, warn};
use std::io::{self, Write};
use std::time::Duration;

use crate::config::UartConfig;
use crate::frame::Frame;
use crate::logutil::hex_snippet;
use crate::shutdown::Shutdown;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("serial port {port} unavailable: {reason}")]
    SerialPortUnavailable { port: String, reason: String },

    #[error("serial write failed: {0}")]
    SerialWriteFault(#[from] io::Error),

    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
}

/// An open link. Anything that accepts bytes can serve as one.
pub type Link = Box<dyn Write + Send>;

/// Opens the downstream link with fixed parameters.
pub trait LinkConnector: Send {
    fn open(&self) -> Result<Link, LinkError>;

    /// Human readable target for log lines, e.g. the device path.
    fn describe(&self) -> String;
}

/// Opens a real serial port from the `[uart]` configuration.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    config: UartConfig,
    timeout: Duration,
}

impl SerialConnector {
    pub fn new(config: UartConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }
}

#[cfg(feature = "serial")]
mod port_settings {
    use log::warn;
    use serialport::{DataBits, FlowControl, Parity, StopBits};

    use crate::config::UartConfig;

    pub fn data_bits(bits: u8) -> DataBits {
        match bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            other => {
                warn!("Unsupported bytesize {}, using 8", other);
                DataBits::Eight
            }
        }
    }

    pub fn parity(name: &str) -> Parity {
        match name.trim().to_ascii_lowercase().as_str() {
            "none" | "n" => Parity::None,
            "even" | "e" => Parity::Even,
            "odd" | "o" => Parity::Odd,
            other => {
                warn!("Unsupported parity {:?}, using none", other);
                Parity::None
            }
        }
    }

    pub fn stop_bits(bits: u8) -> StopBits {
        match bits {
            1 => StopBits::One,
            2 => StopBits::Two,
            other => {
                warn!("Unsupported stopbits {}, using 1", other);
                StopBits::One
            }
        }
    }

    /// Log a failed DTR assertion. The port stays usable without it.
    pub fn dtr_asserted(port: &str, result: serialport::Result<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("Cannot assert DTR on {}: {}", port, e);
                false
            }
        }
    }

    pub fn flow_control(config: &UartConfig) -> FlowControl {
        if config.rtscts {
            FlowControl::Hardware
        } else if config.xonxoff {
            FlowControl::Software
        } else {
            FlowControl::None
        }
    }
}

impl LinkConnector for SerialConnector {
    #[cfg(feature = "serial")]
    fn open(&self) -> Result<Link, LinkError> {
        let cfg = &self.config;
        let builder = serialport::new(cfg.port.as_str(), cfg.baudrate)
            .timeout(self.timeout)
            .data_bits(port_settings::data_bits(cfg.bytesize))
            .parity(port_settings::parity(&cfg.parity))
            .stop_bits(port_settings::stop_bits(cfg.stopbits))
            .flow_control(port_settings::flow_control(cfg));
        let mut port = builder
            .open()
            .map_err(|e| LinkError::SerialPortUnavailable {
                port: cfg.port.clone(),
                reason: e.to_string(),
            })?;
        if cfg.dsrdtr {
            port_settings::dtr_asserted(&cfg.port, port.write_data_terminal_ready(true));
        }
        info!("Opened serial port {} at {} baud", cfg.port, cfg.baudrate);
        Ok(Box::new(port))
    }

    #[cfg(not(feature = "serial"))]
    fn open(&self) -> Result<Link, LinkError> {
        Err(LinkError::SerialPortUnavailable {
            port: self.config.port.clone(),
            reason: "built without the `serial` feature".to_string(),
        })
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.config.port, self.config.baudrate)
    }
}

/// Result of one delivery attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub attempts: u32,
    pub success: bool,
    pub bytes_written: usize,
    /// Attempts were cut short by shutdown rather than used up.
    pub interrupted: bool,
}

pub struct DeliveryManager {
    connector: Box<dyn LinkConnector>,
    link: Option<Link>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl DeliveryManager {
    pub fn new(connector: Box<dyn LinkConnector>, max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            connector,
            link: None,
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    /// Open the link now instead of on the first delivery. Failure is not
    /// fatal; the next attempt tries again.
    pub fn connect(&mut self) -> Result<(), LinkError> {
        if self.link.is_none() {
            self.link = Some(self.connector.open()?);
        }
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            let _ = link.flush();
            info!("Closed serial link {}", self.connector.describe());
        }
    }

    /// Deliver `frame` with bounded retries. Never returns an error: an
    /// exhausted sequence is reported as `success == false`.
    pub async fn deliver(&mut self, frame: &Frame, shutdown: &mut Shutdown) -> DeliveryOutcome {
        let mut attempts = 0;
        while attempts < self.max_attempts {
            attempts += 1;
            match self.attempt(frame.as_bytes()) {
                Ok(written) => {
                    debug!(
                        "Sent {} bytes to {}: {}",
                        written,
                        self.connector.describe(),
                        hex_snippet(frame.as_bytes(), 32)
                    );
                    return DeliveryOutcome {
                        attempts,
                        success: true,
                        bytes_written: written,
                        interrupted: false,
                    };
                }
                Err(e) => {
                    warn!(
                        "Delivery attempt {}/{} failed: {}",
                        attempts, self.max_attempts, e
                    );
                }
            }

            if attempts < self.max_attempts && !wait_before_retry(self.retry_delay, shutdown).await {
                info!(
                    "Shutdown requested, abandoning {}-byte {} frame after {} of {} attempts",
                    frame.len(),
                    frame.format(),
                    attempts,
                    self.max_attempts
                );
                return DeliveryOutcome {
                    attempts,
                    success: false,
                    bytes_written: 0,
                    interrupted: true,
                };
            }
        }

        warn!(
            "Link exhausted after {} attempts, dropping {}-byte {} frame",
            attempts,
            frame.len(),
            frame.format()
        );
        DeliveryOutcome {
            attempts,
            success: false,
            bytes_written: 0,
            interrupted: false,
        }
    }

    fn attempt(&mut self, bytes: &[u8]) -> Result<usize, LinkError> {
        self.connect()?;
        let Some(link) = self.link.as_mut() else {
            return Err(LinkError::SerialPortUnavailable {
                port: self.connector.describe(),
                reason: "link not open".to_string(),
            });
        };

        let result = link.write(bytes).and_then(|written| {
            link.flush()?;
            Ok(written)
        });
        match result {
            Ok(written) if written == bytes.len() => Ok(written),
            Ok(written) => Err(LinkError::ShortWrite {
                written,
                expected: bytes.len(),
            }),
            Err(e) => {
                // Reopen with the same parameters on the next attempt.
                self.link = None;
                Err(LinkError::SerialWriteFault(e))
            }
        }
    }
}

/// Sleep for `delay`. Returns false when shutdown was requested.
async fn wait_before_retry(delay: Duration, shutdown: &mut Shutdown) -> bool {
    if shutdown.is_requested() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = shutdown.requested() => false,
    }
}

impl Drop for DeliveryManager {
    fn drop(&mut self) {
        self.close();
    }
}
