//! One pipeline run per inbound message: identity, decode, validate, frame,
//! deliver. Every failure is counted and logged here and never escapes, so
//! the next message is processed regardless of what happened to this one.

use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::stats::StatsTracker;
use crate::config::Config;
use crate::frame::{Frame, FrameBuilder, FrameError};
use crate::logutil::escape_log;
use crate::serial::{DeliveryManager, DeliveryOutcome, LinkConnector};
use crate::shutdown::Shutdown;
use crate::uplink::decode::{self, CanonicalPayload, DecodeError};
use crate::uplink::topic::extract_device_identity;
use crate::uplink::{InboundMessage, UplinkEvent, UplinkMetadata};

/// Why a message was dropped before delivery.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// A message that made it through decoding and framing.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub identity: String,
    pub metadata: UplinkMetadata,
    pub payload: CanonicalPayload,
    pub frame: Frame,
}

/// Identity, decode, validate and frame steps of the pipeline.
pub fn prepare(
    builder: &FrameBuilder,
    max_payload_size: usize,
    msg: &InboundMessage,
) -> Result<Prepared, DispatchError> {
    let identity = extract_device_identity(&msg.topic);
    let event = UplinkEvent::from_slice(&msg.payload).map_err(DecodeError::from)?;
    let payload = decode::decode_event(&event)?;
    decode::ensure_valid(&payload, max_payload_size)?;
    let frame = builder.build(&identity, &event, &payload)?;
    Ok(Prepared {
        identity,
        metadata: event.metadata(),
        payload,
        frame,
    })
}

#[derive(Debug)]
pub enum DispatchOutcome {
    Delivered(DeliveryOutcome),
    /// Delivery attempts ran out; the frame is dropped.
    Exhausted(DeliveryOutcome),
    /// Shutdown arrived while waiting to retry; the frame is dropped.
    Abandoned(DeliveryOutcome),
    Rejected(DispatchError),
}

impl DispatchOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered(_))
    }
}

pub struct Dispatcher {
    builder: FrameBuilder,
    max_payload_size: usize,
    delivery: DeliveryManager,
    stats: Arc<StatsTracker>,
    shutdown: Shutdown,
}

impl Dispatcher {
    pub fn new(
        config: &Config,
        connector: Box<dyn LinkConnector>,
        stats: Arc<StatsTracker>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            builder: FrameBuilder::new(config.system.frame_format),
            max_payload_size: config.uart.max_payload_size,
            delivery: DeliveryManager::new(
                connector,
                config.retry_attempts(),
                config.retry_delay(),
            ),
            stats,
            shutdown,
        }
    }

    pub fn stats(&self) -> &Arc<StatsTracker> {
        &self.stats
    }

    /// Open the serial link ahead of the first message. A failure is logged
    /// and left for the first delivery attempt to retry.
    pub fn connect(&mut self) {
        if let Err(e) = self.delivery.connect() {
            warn!("Serial link not available yet: {}", e);
        }
    }

    /// Decode and frame `msg` without touching the link.
    pub fn prepare(&self, msg: &InboundMessage) -> Result<Prepared, DispatchError> {
        prepare(&self.builder, self.max_payload_size, msg)
    }

    pub async fn dispatch(&mut self, msg: InboundMessage) -> DispatchOutcome {
        self.stats.record_received();
        debug!(
            "Message on {}: {}",
            msg.topic,
            escape_log(&String::from_utf8_lossy(&msg.payload))
        );

        let prepared = match self.prepare(&msg) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!("Dropping message on {}: {}", msg.topic, e);
                self.stats.record_error();
                return DispatchOutcome::Rejected(e);
            }
        };

        let outcome = self
            .delivery
            .deliver(&prepared.frame, &mut self.shutdown)
            .await;
        if outcome.success {
            self.stats.record_sent();
            info!(
                "Forwarded {} from {} ({} payload bytes{}, {} frame bytes, attempt {}) {}",
                prepared.frame.format(),
                prepared.identity,
                prepared.payload.len(),
                if prepared.payload.hex_unwrapped {
                    ", hex unwrapped"
                } else {
                    ""
                },
                outcome.bytes_written,
                outcome.attempts,
                prepared.metadata
            );
            DispatchOutcome::Delivered(outcome)
        } else if outcome.interrupted {
            self.stats.record_error();
            warn!(
                "Dropped message from {} on shutdown after {} attempts",
                prepared.identity, outcome.attempts
            );
            DispatchOutcome::Abandoned(outcome)
        } else {
            self.stats.record_error();
            error!(
                "Failed to deliver message from {} after {} attempts",
                prepared.identity, outcome.attempts
            );
            DispatchOutcome::Exhausted(outcome)
        }
    }

    /// Process queued messages one at a time until the queue closes or
    /// shutdown is requested, then close the link. A message already being
    /// delivered is finished first.
    pub async fn run(mut self, mut rx: mpsc::Receiver<InboundMessage>) -> Self {
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.requested() => {
                    debug!("Dispatcher stopping on shutdown");
                    break;
                }
                msg = rx.recv() => match msg {
                    Some(msg) => {
                        self.dispatch(msg).await;
                    }
                    None => {
                        debug!("Inbound queue closed");
                        break;
                    }
                },
            }
        }
        self.close();
        self
    }

    pub fn close(&mut self) {
        self.delivery.close();
    }
}
