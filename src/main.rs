//! Binary entrypoint for the lorabridge CLI.
//!
//! Commands:
//! - `start [--port <path>]` - run the bridge, optionally overriding `uart.port`
//! - `init` - write a default `config.toml`
//! - `status` - print the effective configuration
//! - `decode --topic <t> --payload <json|@file>` - run one uplink through
//!   decoding and framing offline and print the resulting frame
//!
//! See the library crate docs for module-level details: `lorabridge::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::info;

use lorabridge::bridge::dispatcher::prepare;
use lorabridge::bridge::{self, Bridge};
use lorabridge::config::{Config, LoggingConfig};
use lorabridge::frame::{FrameBuilder, FrameFormat};
use lorabridge::logutil::RotatingFile;
use lorabridge::serial::SerialConnector;
use lorabridge::uplink::InboundMessage;

#[derive(Parser)]
#[command(name = "lorabridge")]
#[command(about = "Forward ChirpStack LoRaWAN uplinks from MQTT to a serial microcontroller")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bridge
    Start {
        /// Serial device (e.g., /dev/ttyUSB0), overrides uart.port
        #[arg(short, long)]
        port: Option<String>,
    },
    /// Write a default configuration file
    Init,
    /// Show the effective configuration
    Status,
    /// Decode and frame one uplink without MQTT or serial I/O
    Decode {
        /// Event topic, e.g. application/1/device/0011223344556677/event/up
        #[arg(short, long)]
        topic: String,
        /// Uplink JSON, or @path to read it from a file
        #[arg(short, long)]
        payload: String,
        /// Frame format, overrides system.frame_format
        #[arg(short, long, value_parser = parse_format)]
        format: Option<FrameFormat>,
    },
}

fn parse_format(value: &str) -> Result<FrameFormat, String> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| format!("unknown frame format {value:?} (prefixed-binary, hex-line, sensor-packets)"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config early to configure logging; `init` runs without one.
    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(pre_config.as_ref().map(|c| &c.logging), cli.verbose);

    match cli.command {
        Commands::Start { port } => {
            let mut config = Config::load_or_default(&cli.config).await;
            if let Some(port) = port {
                config.uart.port = port;
            }
            info!("Starting lorabridge v{}", env!("CARGO_PKG_VERSION"));
            let connector = SerialConnector::new(config.uart.clone(), config.uart_timeout());
            Bridge::new(config, Box::new(connector)).run().await?;
        }
        Commands::Init => {
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Status => {
            let config = Config::load_or_default(&cli.config).await;
            bridge::show_status(&config);
        }
        Commands::Decode {
            topic,
            payload,
            format,
        } => {
            let mut config = pre_config.unwrap_or_default();
            if let Some(format) = format {
                config.system.frame_format = format;
            }
            let raw = match payload.strip_prefix('@') {
                Some(path) => tokio::fs::read(path)
                    .await
                    .map_err(|e| anyhow!("Failed to read payload file {}: {}", path, e))?,
                None => payload.into_bytes(),
            };
            decode_offline(&config, InboundMessage::new(topic, raw))?;
        }
    }

    Ok(())
}

fn decode_offline(config: &Config, msg: InboundMessage) -> Result<()> {
    let builder = FrameBuilder::new(config.system.frame_format);
    let prepared = prepare(&builder, config.uart.max_payload_size, &msg)?;
    println!("Device:   {}", prepared.identity);
    println!(
        "Payload:  {} bytes{} {}",
        prepared.payload.len(),
        if prepared.payload.hex_unwrapped {
            " (hex unwrapped)"
        } else {
            ""
        },
        hex::encode(&prepared.payload.bytes)
    );
    println!("Metadata: {}", prepared.metadata);
    println!(
        "Frame:    {} {} bytes {}",
        prepared.frame.format(),
        prepared.frame.len(),
        hex::encode(prepared.frame.as_bytes())
    );
    Ok(())
}

fn init_logging(logging: Option<&LoggingConfig>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let configured = logging
        .and_then(|l| l.level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);
    let base_level = match verbosity {
        0 => configured,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    // rumqttc is chatty at debug level
    builder.filter_module("rumqttc", base_level.min(log::LevelFilter::Info));

    let file = logging.and_then(|l| {
        let path = l.file.as_ref()?;
        match RotatingFile::open(path, l.max_file_bytes(), l.backup_count) {
            Ok(f) => Some(f),
            Err(e) => {
                eprintln!("Cannot open log file {}: {}", path, e);
                None
            }
        }
    });

    if let Some(f) = file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Foreground runs keep console output next to the file
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
