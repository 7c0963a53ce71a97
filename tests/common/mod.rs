#![allow(dead_code)]

use std::collections::BTreeMap;
use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use console_bridge::{BridgeConfig, BridgeController, MiniScript};

pub type TestResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

pub const INIT_WAIT: Duration = Duration::from_secs(10);
pub const TICKET_WAIT: Duration = Duration::from_secs(10);
pub const STATE_WAIT: Duration = Duration::from_secs(5);

pub fn test_config() -> BridgeConfig {
    BridgeConfig {
        poll_interval: Duration::from_millis(2),
        force_terminate_grace: Duration::from_millis(300),
        // Empty override keeps an inherited debug-events env var from
        // scattering log files during the test run.
        debug_events_dir: Some(PathBuf::new()),
        ..BridgeConfig::default()
    }
}

pub fn lesson_bridge() -> TestResult<BridgeController> {
    let bridge = BridgeController::new(
        Box::new(|| Box::new(MiniScript::new())),
        test_config(),
    )?;
    Ok(bridge)
}

pub fn ready_bridge() -> TestResult<BridgeController> {
    let mut bridge = lesson_bridge()?;
    bridge.initialize().wait_ready(INIT_WAIT)?;
    Ok(bridge)
}

pub fn files(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(name, content)| (name.to_string(), content.to_string()))
        .collect()
}
