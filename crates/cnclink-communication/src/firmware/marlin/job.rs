//! Job streaming
//!
//! A `JobRunner` streams one prepared program to the board, keeping up to
//! `buffer_size` commands in flight. Homing and dwell commands are
//! special: the board gives no useful pacing while they execute, so the
//! runner drains the window around them instead.
//!
//! ```text
//! Preparing -> Streaming <-> Paused
//!                  |
//!               Draining -> Completed | Stopped | Error
//! ```

use crate::communication::connection::Connection;
use crate::communication::flow::WaitOutcome;
use crate::communication::signals::{JobPhase, JobSignals};
use crate::firmware::marlin::commands::{is_dwell, is_homing, prepare_program};
use cnclink_core::{MachineState, TransportError};
use cnclink_settings::ControllerConfig;
use std::sync::Arc;
use std::time::Duration;

/// Status text of a finished job
pub const STATUS_COMPLETE: &str = "Complete";
/// Status text of a stopped job
pub const STATUS_STOPPED: &str = "Stopped";
/// Status text of a failed job
pub const STATUS_ERROR: &str = "Error";

/// How a job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Every command sent, window drained
    Completed,
    /// Stop requested
    Stopped,
    /// Transport failure while streaming
    Error(String),
}

/// Wait limits used while streaming
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTiming {
    /// Wait slice while the window is full
    pub wait_granularity: Duration,
    /// Wait slice while draining
    pub drain_granularity: Duration,
    /// Silence after which an acknowledgment counts as lost
    pub stuck_timeout: Duration,
    /// Drain limit around homing
    pub homing_timeout: Duration,
    /// Drain limit after a dwell
    pub dwell_timeout: Duration,
    /// Drain limit at the end
    pub drain_timeout: Duration,
    /// Poll interval while paused
    pub pause_poll: Duration,
}

impl JobTiming {
    /// Timing from controller configuration
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            wait_granularity: config.wait_granularity(),
            drain_granularity: config.drain_granularity(),
            stuck_timeout: config.stuck_timeout(),
            homing_timeout: config.homing_timeout(),
            dwell_timeout: config.dwell_timeout(),
            drain_timeout: config.drain_timeout(),
            pause_poll: config.pause_poll(),
        }
    }
}

enum Streamed {
    AllSent,
    Stopped,
}

/// Streams one program
pub struct JobRunner {
    connection: Arc<Connection>,
    state: Arc<MachineState>,
    signals: Arc<JobSignals>,
    timing: JobTiming,
    commands: Vec<String>,
    last_decile: usize,
}

impl JobRunner {
    /// Prepare a program for streaming
    pub fn new<S: AsRef<str>>(
        connection: Arc<Connection>,
        state: Arc<MachineState>,
        signals: Arc<JobSignals>,
        timing: JobTiming,
        program: &[S],
    ) -> Self {
        signals.set_phase(JobPhase::Preparing);
        Self {
            connection,
            state,
            signals,
            timing,
            commands: prepare_program(program),
            last_decile: 0,
        }
    }

    /// Number of commands that will be sent
    pub fn total(&self) -> usize {
        self.commands.len()
    }

    /// Run to completion, publishing progress and the final status
    pub async fn run(mut self) -> JobOutcome {
        tracing::info!(
            "Starting job with {} commands (buffer size: {})",
            self.total(),
            self.connection.flow().capacity()
        );
        let settled = self
            .connection
            .flow()
            .drain(
                &self.signals,
                self.timing.drain_timeout,
                self.timing.drain_granularity,
            )
            .await;
        match settled {
            WaitOutcome::Ready => {}
            WaitOutcome::Stopped => {
                tracing::info!("Job stopped before streaming");
                let outcome = JobOutcome::Stopped;
                self.finish(&outcome);
                return outcome;
            }
            WaitOutcome::TimedOut => {
                tracing::warn!(
                    "{} command(s) from before the job never acknowledged, discarding",
                    self.connection.flow().in_flight()
                );
            }
        }
        self.connection.flow().reset();
        self.connection.set_streaming(true);

        let outcome = match self.stream().await {
            Ok(Streamed::AllSent) => self.drain().await,
            Ok(Streamed::Stopped) => JobOutcome::Stopped,
            Err(e) => JobOutcome::Error(e.to_string()),
        };

        self.connection.set_streaming(false);
        self.finish(&outcome);
        outcome
    }

    async fn stream(&mut self) -> Result<Streamed, TransportError> {
        self.signals.set_phase(JobPhase::Streaming);
        let flow = self.connection.flow().clone();
        let signals = self.signals.clone();
        let timing = self.timing;

        for index in 0..self.commands.len() {
            if signals.is_stop_requested() {
                tracing::info!("Job stopped by user");
                return Ok(Streamed::Stopped);
            }

            if signals.is_paused() {
                signals.set_phase(JobPhase::Paused);
                tracing::info!("Job paused before command {}", index + 1);
                if !signals.wait_while_paused(timing.pause_poll).await {
                    return Ok(Streamed::Stopped);
                }
                signals.set_phase(JobPhase::Streaming);
                tracing::info!("Job resumed");
            }

            let command = self.commands[index].as_str();
            let outcome = if is_homing(command) {
                let before = flow
                    .drain(&signals, timing.homing_timeout, timing.drain_granularity)
                    .await;
                if before == WaitOutcome::Stopped {
                    return Ok(Streamed::Stopped);
                }
                self.connection.send(command)?;
                flow.drain(&signals, timing.homing_timeout, timing.drain_granularity)
                    .await
            } else if is_dwell(command) {
                self.connection.send(command)?;
                flow.drain(&signals, timing.dwell_timeout, timing.drain_granularity)
                    .await
            } else {
                self.connection.send(command)?;
                flow.wait_for_slot(&signals, timing.wait_granularity, timing.stuck_timeout)
                    .await
            };

            match outcome {
                WaitOutcome::Stopped => return Ok(Streamed::Stopped),
                WaitOutcome::TimedOut if is_homing(command) || is_dwell(command) => {
                    tracing::warn!("Timed out waiting for '{}' to complete", command);
                }
                _ => {}
            }

            self.publish_progress();
        }

        Ok(Streamed::AllSent)
    }

    async fn drain(&mut self) -> JobOutcome {
        self.signals.set_phase(JobPhase::Draining);
        let outcome = self
            .connection
            .flow()
            .drain(
                &self.signals,
                self.timing.drain_timeout,
                self.timing.drain_granularity,
            )
            .await;
        match outcome {
            WaitOutcome::Stopped => JobOutcome::Stopped,
            WaitOutcome::TimedOut => {
                tracing::warn!(
                    "Gave up waiting for final acknowledgments ({} in flight)",
                    self.connection.flow().in_flight()
                );
                JobOutcome::Completed
            }
            WaitOutcome::Ready => JobOutcome::Completed,
        }
    }

    fn publish_progress(&mut self) {
        let total = self.commands.len();
        if total == 0 {
            return;
        }
        let acknowledged = self.connection.flow().counters().acknowledged;
        let progress = (acknowledged as f64 / total as f64).min(1.0);
        self.state.update_progress(progress);

        let decile = (progress * 10.0).floor() as usize;
        if decile > self.last_decile {
            self.last_decile = decile;
            tracing::info!(
                "Job progress: {:.0}% ({}/{} acknowledged)",
                progress * 100.0,
                acknowledged,
                total
            );
        }
    }

    fn finish(&self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Completed => {
                self.signals.set_phase(JobPhase::Completed);
                self.state.update_progress(1.0);
                self.state.set_status(STATUS_COMPLETE, false, false);
                tracing::info!("Job complete ({} commands)", self.total());
            }
            JobOutcome::Stopped => {
                self.signals.set_phase(JobPhase::Stopped);
                self.state.reset_job();
                self.state.set_status(STATUS_STOPPED, false, false);
            }
            JobOutcome::Error(reason) => {
                self.signals.set_phase(JobPhase::Error);
                self.state.set_status(STATUS_ERROR, false, false);
                tracing::error!("Job failed: {}", reason);
            }
        }
    }
}
