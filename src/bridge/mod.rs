//! # Bridge Runtime
//!
//! Wires the MQTT transport to the [`Dispatcher`] through a bounded queue and
//! supervises both:
//!
//! - the transport pushes [`InboundMessage`]s and waits when the queue is full
//! - the dispatcher pulls them one at a time, so frames never interleave on
//!   the serial link
//! - statistics are logged every `system.stats_interval` seconds
//! - SIGINT/SIGTERM request shutdown; the in-flight delivery gets up to
//!   `system.graceful_shutdown_timeout` to finish before the link is closed

pub mod dispatcher;
pub mod stats;

use anyhow::Result;
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::mqtt::MqttTransport;
use crate::serial::LinkConnector;
use crate::shutdown::{self, Shutdown, ShutdownTrigger};
pub use dispatcher::{DispatchError, DispatchOutcome, Dispatcher, Prepared};
pub use stats::{StatsSnapshot, StatsTracker};

pub struct Bridge {
    config: Config,
    stats: Arc<StatsTracker>,
    dispatcher: Dispatcher,
    trigger: ShutdownTrigger,
    shutdown: Shutdown,
}

impl Bridge {
    pub fn new(config: Config, connector: Box<dyn LinkConnector>) -> Self {
        let stats = Arc::new(StatsTracker::new());
        let (trigger, shutdown) = shutdown::channel();
        let dispatcher = Dispatcher::new(&config, connector, Arc::clone(&stats), shutdown.clone());
        Self {
            config,
            stats,
            dispatcher,
            trigger,
            shutdown,
        }
    }

    pub fn stats(&self) -> Arc<StatsTracker> {
        Arc::clone(&self.stats)
    }

    /// Run until SIGINT/SIGTERM.
    pub async fn run(self) -> Result<()> {
        self.run_until(wait_for_signal()).await
    }

    /// Run until `stop` resolves, then shut down gracefully.
    pub async fn run_until<F>(self, stop: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let Bridge {
            config,
            stats,
            mut dispatcher,
            trigger,
            shutdown,
        } = self;

        info!(
            "Starting bridge: {} -> {} ({} frames)",
            config.mqtt.topic, config.uart.port, config.system.frame_format
        );
        dispatcher.connect();

        let (tx, rx) = mpsc::channel(config.mqtt.queue_capacity.max(1));
        let transport = MqttTransport::new(config.mqtt.clone(), tx, shutdown.clone());
        let transport_task = tokio::spawn(transport.run());
        let dispatcher_task = tokio::spawn(dispatcher.run(rx));

        let mut stats_timer = config.stats_interval().map(|period| {
            tokio::time::interval_at(tokio::time::Instant::now() + period, period)
        });
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => {
                    info!("Received shutdown signal");
                    break;
                }
                _ = tick(&mut stats_timer) => stats.log_stats(),
            }
        }

        trigger.trigger();
        let timeout = config.shutdown_timeout();
        finish("dispatcher", dispatcher_task, timeout).await;
        finish("MQTT transport", transport_task, timeout).await;

        stats.log_stats();
        info!("Bridge stopped");
        Ok(())
    }
}

async fn tick(timer: &mut Option<tokio::time::Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Wait for a task to wind down. A task still running at the deadline is
/// aborted; dropping the dispatcher closes the serial link.
async fn finish<T>(name: &str, mut task: JoinHandle<T>, timeout: std::time::Duration) {
    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!("{} task failed: {}", name, e),
        Err(_) => {
            warn!("{} did not stop within {:?}, aborting", name, timeout);
            task.abort();
        }
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("Cannot install SIGTERM handler: {}", e),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Print the effective configuration.
pub fn show_status(config: &Config) {
    println!("=== lorabridge status ===");
    println!(
        "MQTT broker:      {}:{} (client id {})",
        config.mqtt.broker, config.mqtt.port, config.mqtt.client_id
    );
    println!("Subscription:     {}", config.mqtt.topic);
    println!(
        "Serial port:      {} @ {} baud ({}{}{})",
        config.uart.port,
        config.uart.baudrate,
        config.uart.bytesize,
        config.uart.parity.chars().next().unwrap_or('n').to_ascii_uppercase(),
        config.uart.stopbits
    );
    println!("Frame format:     {}", config.system.frame_format);
    println!("Max payload:      {} bytes", config.uart.max_payload_size);
    println!(
        "Delivery retries: {} attempts, {:?} apart",
        config.retry_attempts(),
        config.retry_delay()
    );
    match config.stats_interval() {
        Some(interval) => println!("Stats interval:   {:?}", interval),
        None => println!("Stats interval:   disabled"),
    }
    println!(
        "Serial support:   {}",
        if cfg!(feature = "serial") {
            "enabled"
        } else {
            "disabled (built without the `serial` feature)"
        }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::memory::ScriptedConnector;
    use std::time::Duration;

    #[tokio::test]
    async fn stops_and_reports_when_stop_future_resolves() {
        let mut config = Config::default();
        config.mqtt.broker = "127.0.0.1".to_string();
        config.mqtt.port = 1;
        config.system.graceful_shutdown_timeout = 1;
        let connector = ScriptedConnector::new();
        let bridge = Bridge::new(config, Box::new(connector.clone()));
        let stats = bridge.stats();

        let stop = tokio::time::sleep(Duration::from_millis(50));
        tokio::time::timeout(Duration::from_secs(5), bridge.run_until(stop))
            .await
            .expect("bridge should stop")
            .unwrap();

        assert_eq!(stats.snapshot().received, 0);
        // The link is opened eagerly at startup.
        assert_eq!(connector.opens(), 1);
    }
}
