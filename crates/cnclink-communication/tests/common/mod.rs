#![allow(dead_code)]

use cnclink_communication::{
    MarlinController, SimulatedFirmware, SimulatedOpener, SimulatorOptions, Transport,
};
use cnclink_settings::ControllerConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Configuration with every delay shortened for tests
pub fn fast_config() -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.serial.boot_delay_ms = 0;
    config.serial.probe_timeout_ms = 300;
    config.serial.read_timeout_ms = 5;
    config.flow.wait_granularity_ms = 20;
    config.flow.drain_granularity_ms = 20;
    config.flow.stuck_timeout_ms = 500;
    config.flow.homing_timeout_ms = 3000;
    config.flow.dwell_timeout_ms = 3000;
    config.flow.drain_timeout_ms = 3000;
    config.motion.home_axis_settle_ms = 20;
    config.motion.home_all_settle_ms = 20;
    config.motion.stop_join_timeout_ms = 1000;
    config.motion.pause_poll_ms = 10;
    config.motion.reader_backoff_ms = 5;
    config.post_connect_commands.clear();
    config
}

/// A simulated board acknowledging every `ack_ms` milliseconds
pub fn board(ack_ms: u64) -> Arc<SimulatedFirmware> {
    Arc::new(SimulatedFirmware::new(
        SimulatorOptions::default().with_ack_delay(Duration::from_millis(ack_ms)),
    ))
}

/// A controller connected to `sim`
pub async fn connected(sim: Arc<SimulatedFirmware>, config: ControllerConfig) -> MarlinController {
    let controller = MarlinController::new(config);
    let opener = SimulatedOpener::new().with_board(sim);
    controller
        .connect(&opener)
        .await
        .expect("simulated board should connect");
    controller
}

/// Lines written to `sim` after the identification probe
pub fn sent_after_probe(sim: &SimulatedFirmware) -> Vec<String> {
    let lines = sim.written_lines();
    match lines.iter().position(|l| l == "M115") {
        Some(idx) => lines[idx + 1..].to_vec(),
        None => lines,
    }
}

/// Poll `pred` until it holds or `limit` passes
pub async fn wait_until(limit: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    pred()
}

/// `count` simple moves
pub fn moves(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("G1 X{} F1000", i)).collect()
}

/// Name of a simulated board
pub fn name_of(sim: &SimulatedFirmware) -> String {
    sim.name()
}
