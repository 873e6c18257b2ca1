//! Marlin Controller Implementation
//!
//! `MarlinController` is the command executor: it owns the connection,
//! issues jog and homing sequences, starts/pauses/resumes/stops streamed
//! jobs and offers a synchronous command/response exchange.
//!
//! Motion operations re-check their preconditions (idle and connected)
//! every time. When those do not hold the call does nothing beyond a
//! warning; callers observe the outcome through `MachineState`.

use crate::communication::connection::Connection;
use crate::communication::discovery::discover;
use crate::communication::flow::FlowCounters;
use crate::communication::serial::SerialOpener;
use crate::communication::signals::{JobPhase, JobSignals};
use crate::communication::transport::EndpointOpener;
use crate::firmware::marlin::commands::{
    self, ABSOLUTE_MODE, HOME_ALL, QUICK_STOP, RELATIVE_MODE, REPORT_POSITION, ZERO_ROTARY,
};
use crate::firmware::marlin::job::{
    JobOutcome, JobRunner, JobTiming, STATUS_ERROR, STATUS_STOPPED,
};
use cnclink_core::{
    Axis, ConnectionError, JobDescriptor, MachineSnapshot, MachineState, TransportError,
    STATUS_DISCONNECTED, STATUS_IDLE,
};
use cnclink_settings::ControllerConfig;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};

/// Returned by `send_command_with_response` when nothing answered in time
pub const NO_RESPONSE: &str = "No response";
/// Returned by `send_command_with_response` without a connection
pub const NOT_CONNECTED: &str = "ERROR: Not connected to controller";

/// Status text while a streamed job runs
pub const STATUS_RUNNING: &str = "Running";
/// Status text while a streamed job is paused
pub const STATUS_PAUSED: &str = "Paused";

/// Command executor for a Marlin board
pub struct MarlinController {
    config: ControllerConfig,
    state: Arc<MachineState>,
    connection: RwLock<Option<Arc<Connection>>>,
    signals: Arc<JobSignals>,
    runner: Mutex<Option<JoinHandle<JobOutcome>>>,
    loaded: Mutex<Option<JobDescriptor>>,
}

impl MarlinController {
    /// Create a disconnected controller with its own state
    pub fn new(config: ControllerConfig) -> Self {
        Self::with_state(config, Arc::new(MachineState::new()))
    }

    /// Create a disconnected controller publishing into `state`
    pub fn with_state(config: ControllerConfig, state: Arc<MachineState>) -> Self {
        state.set_status(STATUS_DISCONNECTED, false, false);
        Self {
            config,
            state,
            connection: RwLock::new(None),
            signals: Arc::new(JobSignals::new()),
            runner: Mutex::new(None),
            loaded: Mutex::new(None),
        }
    }

    /// Shared machine state
    pub fn state(&self) -> &Arc<MachineState> {
        &self.state
    }

    /// Consistent copy of the machine state
    pub fn snapshot(&self) -> MachineSnapshot {
        self.state.snapshot()
    }

    /// Active configuration
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Whether a board is connected
    pub fn is_connected(&self) -> bool {
        self.connection.read().is_some()
    }

    /// Name of the connected endpoint
    pub fn endpoint(&self) -> Option<String> {
        self.connection
            .read()
            .as_ref()
            .map(|c| c.endpoint().to_string())
    }

    /// Flow counters of the current connection
    pub fn flow_counters(&self) -> Option<FlowCounters> {
        self.connection.read().as_ref().map(|c| c.flow().counters())
    }

    pub(crate) fn connection(&self) -> Option<Arc<Connection>> {
        self.connection.read().clone()
    }

    /// Find a board through `opener` and connect to it.
    ///
    /// On success the status becomes Idle and the post-connect commands are
    /// sent once, best effort. On failure the status is Disconnected.
    pub async fn connect(&self, opener: &dyn EndpointOpener) -> Result<(), ConnectionError> {
        if let Some(endpoint) = self.endpoint() {
            tracing::info!("Already connected to {}", endpoint);
            return Ok(());
        }

        let connection = match discover(opener, &self.config).await.and_then(|found| {
            Connection::open(found, self.state.clone(), &self.config)
        }) {
            Ok(c) => Arc::new(c),
            Err(e) => {
                tracing::error!("Connection failed: {}", e);
                self.state.set_status(STATUS_DISCONNECTED, false, false);
                return Err(e);
            }
        };

        *self.connection.write() = Some(connection.clone());
        self.state.set_status(STATUS_IDLE, false, false);
        tracing::info!("Connected to controller on {}", connection.endpoint());

        for command in &self.config.post_connect_commands {
            if let Err(e) = connection.send(command) {
                tracing::warn!("Post-connect command '{}' failed: {}", command, e);
            }
        }
        Ok(())
    }

    /// Connect to the first serial port answering as Marlin
    pub async fn connect_serial(&self) -> Result<(), ConnectionError> {
        let opener = SerialOpener::new(self.config.read_timeout());
        self.connect(&opener).await
    }

    /// Stop any job, close the connection and mark the state Disconnected
    pub async fn disconnect(&self) {
        if self.is_job_active() {
            self.stop_job().await;
        }
        let connection = self.connection.write().take();
        if let Some(connection) = connection {
            connection.close();
        }
        self.state.set_status(STATUS_DISCONNECTED, false, false);
    }

    fn motion_connection(&self, operation: &str) -> Option<Arc<Connection>> {
        let idle = self.state.is_idle();
        let connection = self.connection();
        if !idle || connection.is_none() {
            tracing::warn!(
                "Cannot {}: idle={}, connected={}",
                operation,
                idle,
                connection.is_some()
            );
            return None;
        }
        connection
    }

    fn relative_move(connection: &Connection, motion: &str) -> Result<(), TransportError> {
        connection.send(RELATIVE_MODE)?;
        let moved = connection.send(motion);
        // leave the board in absolute mode even if the move failed
        let restored = connection.send(ABSOLUTE_MODE);
        moved?;
        restored?;
        connection.send(REPORT_POSITION)
    }

    /// Jog one axis by `distance` (mm, or degrees for A) at `feed_rate`
    pub fn jog(&self, axis: Axis, distance: f64, feed_rate: f64) -> Result<(), TransportError> {
        let Some(connection) = self.motion_connection("jog") else {
            return Ok(());
        };
        let distance = if axis.is_rotary() && self.config.motion.invert_rotary_axis {
            -distance
        } else {
            distance
        };
        tracing::info!("Jog {} by {} at F{}", axis, distance, feed_rate);
        Self::relative_move(&connection, &commands::linear_move(axis, distance, feed_rate))
    }

    /// Jog X and Y together along a straight diagonal
    pub fn jog_xy(&self, dx: f64, dy: f64, feed_rate: f64) -> Result<(), TransportError> {
        let Some(connection) = self.motion_connection("jog") else {
            return Ok(());
        };
        tracing::info!("Jog XY by ({}, {}) at F{}", dx, dy, feed_rate);
        Self::relative_move(&connection, &commands::linear_move_xy(dx, dy, feed_rate))
    }

    /// Home one axis; returns once the settle delay has passed
    pub async fn home_axis(&self, axis: Axis) -> Result<(), TransportError> {
        let Some(connection) = self.motion_connection("home") else {
            return Ok(());
        };
        self.state
            .set_status(format!("Homing {}...", axis), true, false);

        let result = async {
            connection.send(&commands::home_axis(axis))?;
            tokio::time::sleep(self.config.home_axis_settle()).await;
            connection.send(REPORT_POSITION)
        }
        .await;

        self.state.set_status(STATUS_IDLE, false, false);
        result
    }

    /// Home every axis, optionally zeroing the rotary axis afterwards
    pub async fn home_all(&self) -> Result<(), TransportError> {
        let Some(connection) = self.motion_connection("home") else {
            return Ok(());
        };
        self.state.set_status("Homing all axes...", true, false);

        let result = async {
            connection.send(HOME_ALL)?;
            tokio::time::sleep(self.config.home_all_settle()).await;
            if self.config.motion.zero_rotary_after_home_all {
                connection.send(ZERO_ROTARY)?;
            }
            connection.send(REPORT_POSITION)
        }
        .await;

        self.state.set_status(STATUS_IDLE, false, false);
        result
    }

    /// Store a program and mark it loaded. Refused while busy.
    pub fn load_job(&self, job: JobDescriptor) -> bool {
        if !self.state.is_idle() {
            tracing::warn!("Cannot load a job while busy");
            return false;
        }
        tracing::info!(
            "Loaded job {} ({} lines)",
            job.source_name.as_deref().unwrap_or("<unnamed>"),
            job.len()
        );
        self.state.set_job_loaded(true, job.source_name.clone());
        *self.loaded.lock() = Some(job);
        true
    }

    /// Forget the loaded program. Refused while busy.
    pub fn unload_job(&self) -> bool {
        if !self.state.is_idle() {
            tracing::warn!("Cannot unload a job while busy");
            return false;
        }
        self.loaded.lock().take();
        self.state.set_job_loaded(false, None);
        true
    }

    /// The loaded program
    pub fn loaded_job(&self) -> Option<JobDescriptor> {
        self.loaded.lock().clone()
    }

    /// Start streaming the loaded program
    pub fn start_loaded_job(&self) -> bool {
        match self.loaded_job() {
            Some(job) => self.start_job(job.commands),
            None => {
                tracing::warn!("Cannot start: no job loaded");
                false
            }
        }
    }

    /// Start streaming `commands` in the background.
    ///
    /// Requires idle, a loaded job, a connection and a tokio runtime.
    /// Returns whether a runner was started.
    pub fn start_job(&self, commands: Vec<String>) -> bool {
        let mut runner = self.runner.lock();

        let idle = self.state.is_idle();
        let loaded = self.state.job_loaded();
        let Some(connection) = self.connection().filter(|_| idle && loaded) else {
            tracing::warn!(
                "Cannot start job: idle={}, loaded={}, connected={}",
                idle,
                loaded,
                self.is_connected()
            );
            return false;
        };
        if runner.as_ref().is_some_and(|h| !h.is_finished()) {
            tracing::warn!("Cannot start job: another job is still running");
            return false;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::error!("Cannot start job outside a tokio runtime");
            return false;
        };

        self.signals.clear();
        self.state.update_progress(0.0);
        self.state.set_status(STATUS_RUNNING, true, false);

        let job = JobRunner::new(
            connection.clone(),
            self.state.clone(),
            self.signals.clone(),
            JobTiming::from_config(&self.config),
            &commands,
        );
        let inner = handle.spawn(job.run());
        *runner = Some(handle.spawn(supervise(
            inner,
            connection,
            self.state.clone(),
            self.signals.clone(),
        )));
        true
    }

    /// Whether a job runner is alive
    pub fn is_job_active(&self) -> bool {
        self.runner
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Current phase of the job runner
    pub fn job_phase(&self) -> JobPhase {
        self.signals.phase()
    }

    /// Suspend a running job before its next command
    pub fn pause_job(&self) {
        if self.state.is_running() && self.is_job_active() {
            self.signals.pause();
            self.state.set_status(STATUS_PAUSED, true, true);
            tracing::info!("Job pause requested");
        }
    }

    /// Continue a paused job with its next unsent command
    pub fn resume_job(&self) {
        if self.state.is_paused() && self.is_job_active() {
            self.signals.resume();
            self.state.set_status(STATUS_RUNNING, true, false);
            tracing::info!("Job resumed");
        }
    }

    /// Stop motion and the job runner. Safe to call at any time, any
    /// number of times; always ends idle with progress 0 and status Stopped.
    pub async fn stop_job(&self) {
        self.signals.request_stop();
        self.signals.resume();

        if let Some(connection) = self.connection() {
            if let Err(e) = connection.send(QUICK_STOP) {
                tracing::warn!("Failed to send quick stop: {}", e);
            }
        }

        let handle = self.runner.lock().take();
        if let Some(mut handle) = handle {
            match tokio::time::timeout(self.config.stop_join_timeout(), &mut handle).await {
                Ok(Ok(outcome)) => tracing::debug!("Job runner exited: {:?}", outcome),
                Ok(Err(e)) => tracing::warn!("Job runner failed: {}", e),
                Err(_) => {
                    tracing::warn!(
                        "Job runner did not exit within {:?}, aborting it",
                        self.config.stop_join_timeout()
                    );
                    handle.abort();
                }
            }
        }

        self.state.reset_job();
        self.state.set_status(STATUS_STOPPED, false, false);
        tracing::info!("Job stopped");
    }

    /// Send a command and wait for its answer, up to and including the
    /// acknowledgment. Returns the answer lines joined by newlines, the
    /// partial answer on timeout, or a sentinel when nothing could be read.
    pub async fn send_command_with_response(&self, command: &str, timeout: Duration) -> String {
        let Some(connection) = self.connection() else {
            return NOT_CONNECTED.to_string();
        };
        match connection.exchange(command, timeout).await {
            Ok(lines) if lines.is_empty() => NO_RESPONSE.to_string(),
            Ok(lines) => lines.join("\n"),
            Err(TransportError::Disconnected) => NOT_CONNECTED.to_string(),
            Err(e) => format!("ERROR: {}", e),
        }
    }

    /// Send one raw command without waiting for its answer
    pub fn send_command(&self, command: &str) -> Result<(), TransportError> {
        match self.connection() {
            Some(connection) => connection.send(command),
            None => {
                tracing::warn!("Cannot send '{}': not connected", command);
                Ok(())
            }
        }
    }
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Await the job runner; a runner that panics still ends the job in Error.
/// Aborting the supervisor aborts the runner with it.
async fn supervise(
    runner: JoinHandle<JobOutcome>,
    connection: Arc<Connection>,
    state: Arc<MachineState>,
    signals: Arc<JobSignals>,
) -> JobOutcome {
    let _abort = AbortOnDrop(runner.abort_handle());
    match runner.await {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => {
            connection.set_streaming(false);
            signals.set_phase(JobPhase::Error);
            state.set_status(STATUS_ERROR, false, false);
            tracing::error!("Job runner panicked, job failed");
            JobOutcome::Error("job runner panicked".to_string())
        }
        Err(e) => {
            tracing::debug!("Job runner cancelled: {}", e);
            JobOutcome::Stopped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disconnected_controller() {
        let controller = MarlinController::new(ControllerConfig::default());
        assert!(!controller.is_connected());
        assert_eq!(controller.state().status_text(), STATUS_DISCONNECTED);

        controller.jog(Axis::X, 1.0, 100.0).unwrap();
        controller.home_all().await.unwrap();
        assert_eq!(controller.state().status_text(), STATUS_DISCONNECTED);

        assert_eq!(
            controller
                .send_command_with_response("M114", Duration::from_millis(10))
                .await,
            NOT_CONNECTED
        );
    }

    #[tokio::test]
    async fn test_start_requires_loaded_job() {
        let controller = MarlinController::new(ControllerConfig::default());
        assert!(!controller.start_loaded_job());
        assert!(controller.load_job(JobDescriptor::new(vec!["G1 X1".into()], None)));
        // still not connected
        assert!(!controller.start_loaded_job());
        assert!(controller.unload_job());
        assert!(!controller.state().job_loaded());
    }

    #[tokio::test]
    async fn test_stop_without_job_is_safe() {
        let controller = MarlinController::new(ControllerConfig::default());
        controller.stop_job().await;
        controller.stop_job().await;
        assert!(controller.state().is_idle());
        assert_eq!(controller.state().status_text(), STATUS_STOPPED);
    }
}
