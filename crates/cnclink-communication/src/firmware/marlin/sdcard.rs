//! SD card offload
//!
//! Alternative to streaming: the program is written to the board's SD card
//! and the board runs it on its own. Progress then comes from `M27`
//! reports instead of acknowledgment counting.

use crate::firmware::marlin::codec::parse_sd_progress;
use crate::firmware::marlin::commands::{
    self, prepare_program, SD_ABORT, SD_END_WRITE, SD_INIT, SD_LIST, SD_PAUSE, SD_START,
    SD_STATUS,
};
use crate::firmware::marlin::controller::MarlinController;
use crate::firmware::marlin::job::STATUS_STOPPED;
use cnclink_core::JobError;
use std::time::Duration;

/// File name used when a job is offloaded
pub const SD_JOB_FILE: &str = "job.gco";

/// Status text while the board runs a file from SD
pub const STATUS_RUNNING_SD: &str = "Running (SD)";
/// Status text while an SD print is paused
pub const STATUS_PAUSED_SD: &str = "Paused (SD)";

const INIT_TIMEOUT: Duration = Duration::from_secs(5);
const LIST_TIMEOUT: Duration = Duration::from_secs(10);
const PROGRESS_TIMEOUT: Duration = Duration::from_secs(2);

const INIT_SETTLE: Duration = Duration::from_millis(500);
const OPEN_SETTLE: Duration = Duration::from_millis(200);
const LINE_PACING: Duration = Duration::from_millis(10);
const CLOSE_SETTLE: Duration = Duration::from_millis(500);
const SELECT_SETTLE: Duration = Duration::from_millis(300);

impl MarlinController {
    /// Initialize the SD card, returning the board's answer
    pub async fn sd_init(&self) -> String {
        self.send_command_with_response(SD_INIT, INIT_TIMEOUT).await
    }

    /// Names of the files on the SD card
    pub async fn sd_list_files(&self) -> Vec<String> {
        let listing = self.send_command_with_response(SD_LIST, LIST_TIMEOUT).await;
        let mut files = Vec::new();
        let mut inside = false;
        for line in listing.lines() {
            match line.trim() {
                "Begin file list" => inside = true,
                "End file list" => inside = false,
                entry if inside => {
                    if let Some(name) = entry.split_whitespace().next() {
                        files.push(name.to_string());
                    }
                }
                _ => {}
            }
        }
        files
    }

    /// Write a program to the SD card as `name`. Returns the number of
    /// command lines written.
    pub async fn sd_upload<S: AsRef<str>>(
        &self,
        name: &str,
        program: &[S],
    ) -> Result<usize, JobError> {
        let connection = self.connection().ok_or(JobError::NotConnected)?;
        let lines = prepare_program(program);

        connection.send(SD_INIT)?;
        tokio::time::sleep(INIT_SETTLE).await;
        connection.send(&commands::sd_begin_write(name))?;
        tokio::time::sleep(OPEN_SETTLE).await;

        for line in &lines {
            connection.send(line)?;
            tokio::time::sleep(LINE_PACING).await;
        }

        connection.send(SD_END_WRITE)?;
        tokio::time::sleep(CLOSE_SETTLE).await;

        tracing::info!("Uploaded {} to SD card ({} lines)", name, lines.len());
        Ok(lines.len())
    }

    /// Select `name` on the SD card and start running it
    pub async fn sd_start(&self, name: &str) -> Result<(), JobError> {
        let connection = self.connection().ok_or(JobError::NotConnected)?;

        connection.send(SD_INIT)?;
        tokio::time::sleep(SELECT_SETTLE).await;
        connection.send(&commands::sd_select(name))?;
        tokio::time::sleep(SELECT_SETTLE).await;
        connection.send(SD_START)?;

        self.state().update_progress(0.0);
        self.state().set_status(STATUS_RUNNING_SD, true, false);
        tracing::info!("Started SD print: {}", name);
        Ok(())
    }

    /// Pause the SD print
    pub fn sd_pause(&self) -> Result<(), JobError> {
        let connection = self.connection().ok_or(JobError::NotConnected)?;
        connection.send(SD_PAUSE)?;
        self.state().set_status(STATUS_PAUSED_SD, true, true);
        Ok(())
    }

    /// Resume the SD print
    pub fn sd_resume(&self) -> Result<(), JobError> {
        let connection = self.connection().ok_or(JobError::NotConnected)?;
        connection.send(SD_START)?;
        self.state().set_status(STATUS_RUNNING_SD, true, false);
        Ok(())
    }

    /// Abort the SD print
    pub fn sd_stop(&self) -> Result<(), JobError> {
        let connection = self.connection().ok_or(JobError::NotConnected)?;
        connection.send(SD_ABORT)?;
        self.state().reset_job();
        self.state().set_status(STATUS_STOPPED, false, false);
        Ok(())
    }

    /// Ask the board how far the SD print is and publish it as job progress
    pub async fn sd_progress(&self) -> Option<f64> {
        let report = self
            .send_command_with_response(SD_STATUS, PROGRESS_TIMEOUT)
            .await;
        let progress = report.lines().find_map(parse_sd_progress)?;
        self.state().update_progress(progress);
        Some(progress)
    }

    /// Offload `commands` to the SD card and run them from there, falling
    /// back to streaming when the upload fails. Same preconditions as
    /// `start_job`.
    pub async fn start_job_on_sd_card(&self, commands: Vec<String>) -> bool {
        let state = self.state();
        if !state.is_idle() || !state.job_loaded() || !self.is_connected() {
            tracing::warn!(
                "Cannot start SD job: idle={}, loaded={}, connected={}",
                state.is_idle(),
                state.job_loaded(),
                self.is_connected()
            );
            return false;
        }

        let uploaded = match self.sd_upload(SD_JOB_FILE, &commands).await {
            Ok(_) => self.sd_start(SD_JOB_FILE).await,
            Err(e) => Err(e),
        };
        match uploaded {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("SD offload failed ({}), falling back to streaming", e);
                self.start_job(commands)
            }
        }
    }
}
