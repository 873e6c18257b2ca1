//! Shared machine state
//!
//! One `MachineState` is created per controller and shared by reference
//! between the reader thread, the command executor, the job runner and any
//! number of read-only observers. Every operation takes the lock once, so no
//! observer can see a half-applied update.

use crate::data::{MachinePosition, MachineSnapshot, PartialPosition};
use parking_lot::RwLock;

/// Status text used when nothing is happening
pub const STATUS_IDLE: &str = "Idle";
/// Status text used when no controller is attached
pub const STATUS_DISCONNECTED: &str = "Disconnected";

#[derive(Debug, Clone)]
struct Inner {
    position: MachinePosition,
    busy: bool,
    paused: bool,
    status_text: String,
    job_progress: f64,
    job_loaded: bool,
    loaded_source: Option<String>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            position: MachinePosition::default(),
            busy: false,
            paused: false,
            status_text: STATUS_IDLE.to_string(),
            job_progress: 0.0,
            job_loaded: false,
            loaded_source: None,
        }
    }
}

impl Inner {
    fn loaded_status(&self) -> String {
        match &self.loaded_source {
            Some(name) => format!("Loaded: {}", name),
            None => "Loaded".to_string(),
        }
    }
}

/// Internally synchronized machine and job state
#[derive(Debug, Default)]
pub struct MachineState {
    inner: RwLock<Inner>,
}

impl MachineState {
    /// Create a fresh state: origin position, idle, nothing loaded
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a position report; axes missing from `update` keep their value
    pub fn update_position(&self, update: PartialPosition) {
        if update.is_empty() {
            return;
        }
        let mut inner = self.inner.write();
        inner.position = update.apply_to(&inner.position);
    }

    /// Replace status text and flags together.
    ///
    /// `paused` implies `busy`; a paused-but-not-busy request is stored as busy.
    pub fn set_status(&self, text: impl Into<String>, busy: bool, paused: bool) {
        let text = text.into();
        let mut inner = self.inner.write();
        inner.busy = busy || paused;
        inner.paused = paused;
        inner.status_text = text;
    }

    /// Mark a job program as loaded or unloaded
    pub fn set_job_loaded(&self, loaded: bool, source_name: Option<String>) {
        let mut inner = self.inner.write();
        inner.job_loaded = loaded;
        if loaded {
            inner.loaded_source = source_name;
            inner.status_text = inner.loaded_status();
        } else {
            inner.loaded_source = None;
            inner.status_text = STATUS_IDLE.to_string();
            inner.job_progress = 0.0;
        }
    }

    /// Publish job progress, clamped to [0, 1]
    pub fn update_progress(&self, progress: f64) {
        let progress = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 1.0)
        };
        self.inner.write().job_progress = progress;
    }

    /// Clear busy/paused/progress; the loaded program stays loaded
    pub fn reset_job(&self) {
        let mut inner = self.inner.write();
        inner.busy = false;
        inner.paused = false;
        inner.job_progress = 0.0;
        inner.status_text = if inner.job_loaded {
            inner.loaded_status()
        } else {
            STATUS_IDLE.to_string()
        };
    }

    /// Ready for new motion commands
    pub fn is_idle(&self) -> bool {
        let inner = self.inner.read();
        !inner.busy && !inner.paused
    }

    /// A job is actively running (not paused)
    pub fn is_running(&self) -> bool {
        let inner = self.inner.read();
        inner.busy && !inner.paused
    }

    /// Whether the machine is busy
    pub fn is_busy(&self) -> bool {
        self.inner.read().busy
    }

    /// Whether a job is paused
    pub fn is_paused(&self) -> bool {
        self.inner.read().paused
    }

    /// Whether a job program is loaded
    pub fn job_loaded(&self) -> bool {
        self.inner.read().job_loaded
    }

    /// Current position
    pub fn position(&self) -> MachinePosition {
        self.inner.read().position
    }

    /// Current status text
    pub fn status_text(&self) -> String {
        self.inner.read().status_text.clone()
    }

    /// Current job progress
    pub fn progress(&self) -> f64 {
        self.inner.read().job_progress
    }

    /// Consistent copy of everything
    pub fn snapshot(&self) -> MachineSnapshot {
        let inner = self.inner.read();
        MachineSnapshot {
            position: inner.position,
            busy: inner.busy,
            paused: inner.paused,
            status_text: inner.status_text.clone(),
            job_progress: inner.job_progress,
            job_loaded: inner.job_loaded,
            loaded_source: inner.loaded_source.clone(),
        }
    }
}
