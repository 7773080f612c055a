//! MQTT transport: subscribes to the uplink topic filter and pushes every
//! publish onto the bounded inbound queue. The queue is the only link to the
//! pipeline; when it is full the event loop waits, which in turn applies
//! backpressure to the broker.

use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::MqttConfig;
use crate::shutdown::Shutdown;
use crate::uplink::InboundMessage;

/// Capacity of the client's outgoing request channel.
const REQUEST_CAPACITY: usize = 10;

/// How long a clean disconnect may take before the socket is just dropped.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Broker connection options derived from `[mqtt]`.
pub fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.broker, config.port);
    options.set_keep_alive(Duration::from_secs(config.keepalive.max(1)));
    options.set_clean_session(true);
    if let Some(username) = &config.username {
        let password = config.password.clone().unwrap_or_default();
        options.set_credentials(username, password);
    }
    options
}

/// Doubles `current`, capped at `max`.
pub fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

pub struct MqttTransport {
    config: MqttConfig,
    tx: mpsc::Sender<InboundMessage>,
    shutdown: Shutdown,
}

impl MqttTransport {
    pub fn new(config: MqttConfig, tx: mpsc::Sender<InboundMessage>, shutdown: Shutdown) -> Self {
        Self {
            config,
            tx,
            shutdown,
        }
    }

    /// Run until shutdown is requested or the inbound queue closes.
    pub async fn run(mut self) {
        let (client, mut eventloop) = AsyncClient::new(mqtt_options(&self.config), REQUEST_CAPACITY);
        let min_delay = Duration::from_secs(self.config.reconnect_delay_min.max(1));
        let max_delay = Duration::from_secs(self.config.reconnect_delay_max).max(min_delay);
        let mut backoff = min_delay;
        let mut connected = false;

        info!(
            "Connecting to MQTT broker {}:{} as {}",
            self.config.broker, self.config.port, self.config.client_id
        );

        loop {
            let event = tokio::select! {
                _ = self.shutdown.requested() => break,
                event = eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connected to MQTT broker");
                    connected = true;
                    backoff = min_delay;
                    // Clean sessions drop subscriptions on reconnect.
                    match client.try_subscribe(&self.config.topic, QoS::AtLeastOnce) {
                        Ok(()) => info!("Subscribing to {}", self.config.topic),
                        Err(e) => error!("Failed to subscribe to {}: {}", self.config.topic, e),
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(_))) => {
                    debug!("Subscription acknowledged");
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let msg = InboundMessage::new(publish.topic.clone(), publish.payload.to_vec());
                    if !self.enqueue(msg).await {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    connected = false;
                    warn!("MQTT connection error: {}; retrying in {:?}", e, backoff);
                    tokio::select! {
                        _ = self.shutdown.requested() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = next_backoff(backoff, max_delay);
                }
            }
        }

        if connected {
            disconnect(&client, &mut eventloop).await;
        }
        info!("MQTT transport stopped");
    }

    /// Returns false when the transport should stop.
    async fn enqueue(&mut self, msg: InboundMessage) -> bool {
        debug!("Queued message from {} ({} bytes)", msg.topic, msg.payload.len());
        tokio::select! {
            _ = self.shutdown.requested() => false,
            sent = self.tx.send(msg) => match sent {
                Ok(()) => true,
                Err(_) => {
                    warn!("Inbound queue closed, stopping MQTT transport");
                    false
                }
            },
        }
    }
}

/// Send DISCONNECT and drive the event loop until it is on the wire.
async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop) {
    if let Err(e) = client.try_disconnect() {
        debug!("MQTT disconnect request failed: {}", e);
        return;
    }
    let sent = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => return true,
                Ok(_) => {}
                Err(e) => {
                    debug!("MQTT connection closed during disconnect: {}", e);
                    return false;
                }
            }
        }
    })
    .await;
    match sent {
        Ok(true) => debug!("Disconnected from MQTT broker"),
        Ok(false) => {}
        Err(_) => debug!("MQTT disconnect not sent within {:?}", DISCONNECT_TIMEOUT),
    }
}
