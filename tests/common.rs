//! Test utilities & fixtures.
//! Uplink samples live under `tests/test-data-int`.

#![allow(dead_code)] // each test binary uses a different subset

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lorabridge::bridge::{Dispatcher, StatsTracker};
use lorabridge::config::Config;
use lorabridge::frame::FrameFormat;
use lorabridge::serial::memory::ScriptedConnector;
use lorabridge::shutdown::Shutdown;

pub const DEVICE_TOPIC: &str = "application/1/device/aabbccddeeff0011/event/up";

/// Return the path to the static integration test fixture directory.
pub fn fixture_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("test-data-int")
}

pub fn fixture(name: &str) -> Vec<u8> {
    std::fs::read(fixture_root().join(name)).expect("fixture")
}

/// Default configuration with the given frame format and no retry delay.
pub fn config_with(format: FrameFormat) -> Config {
    let mut config = Config::default();
    config.system.frame_format = format;
    config.system.retry_delay = 0.0;
    config
}

pub fn dispatcher(config: &Config, connector: &ScriptedConnector) -> Dispatcher {
    Dispatcher::new(
        config,
        Box::new(connector.clone()),
        Arc::new(StatsTracker::new()),
        Shutdown::never(),
    )
}
