//! Job control signals
//!
//! Stop and pause requests travel from the command executor to the job
//! runner through a `JobSignals` shared by both. The runner also records its
//! current `JobPhase` here so callers can observe where a job is.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Where the job runner currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobPhase {
    /// No job, or the job is being prepared
    #[default]
    Preparing,
    /// Commands are being sent
    Streaming,
    /// Sending is suspended by a pause request
    Paused,
    /// All commands sent, waiting for the final acknowledgments
    Draining,
    /// Every command was sent and acknowledged
    Completed,
    /// The job was stopped on request
    Stopped,
    /// The job ended on a transport failure
    Error,
}

impl JobPhase {
    /// Whether the runner has finished
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Stopped | JobPhase::Error)
    }
}

/// Shared stop/pause flags with wakeups
#[derive(Debug, Default)]
pub struct JobSignals {
    stop: AtomicBool,
    pause: AtomicBool,
    notify: Notify,
    phase: Mutex<JobPhase>,
}

impl JobSignals {
    /// Create cleared signals
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the runner to stop at its next check
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether a stop was requested
    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Suspend sending
    pub fn pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    /// Resume sending
    pub fn resume(&self) {
        self.pause.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether sending is suspended
    pub fn is_paused(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    /// Reset both flags before a new job
    pub fn clear(&self) {
        self.stop.store(false, Ordering::SeqCst);
        self.pause.store(false, Ordering::SeqCst);
        *self.phase.lock() = JobPhase::Preparing;
    }

    /// Record the runner's phase
    pub fn set_phase(&self, phase: JobPhase) {
        *self.phase.lock() = phase;
    }

    /// The runner's last recorded phase
    pub fn phase(&self) -> JobPhase {
        *self.phase.lock()
    }

    /// Resolves once a stop is requested
    pub async fn stopped(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_stop_requested() {
                return;
            }
            notified.await;
        }
    }

    /// Block while paused. Returns `false` if a stop arrived meanwhile.
    pub async fn wait_while_paused(&self, poll: Duration) -> bool {
        while self.is_paused() {
            if self.is_stop_requested() {
                return false;
            }
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_paused() || self.is_stop_requested() {
                continue;
            }
            let _ = tokio::time::timeout(poll, notified).await;
        }
        !self.is_stop_requested()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_flags() {
        let signals = JobSignals::new();
        assert!(!signals.is_stop_requested());
        signals.pause();
        assert!(signals.is_paused());
        signals.request_stop();
        signals.clear();
        assert!(!signals.is_paused());
        assert!(!signals.is_stop_requested());
        assert_eq!(signals.phase(), JobPhase::Preparing);
    }

    #[tokio::test]
    async fn test_stopped_wakes_on_request() {
        let signals = Arc::new(JobSignals::new());
        let waiter = {
            let signals = signals.clone();
            tokio::spawn(async move { signals.stopped().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        signals.request_stop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("stopped() did not resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_while_paused_returns_on_resume() {
        let signals = Arc::new(JobSignals::new());
        signals.pause();
        let waiter = {
            let signals = signals.clone();
            tokio::spawn(async move { signals.wait_while_paused(Duration::from_millis(10)).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        signals.resume();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_while_paused_reports_stop() {
        let signals = JobSignals::new();
        signals.pause();
        signals.request_stop();
        assert!(!signals.wait_while_paused(Duration::from_millis(10)).await);
    }

    #[test]
    fn test_terminal_phases() {
        assert!(JobPhase::Completed.is_terminal());
        assert!(JobPhase::Error.is_terminal());
        assert!(!JobPhase::Draining.is_terminal());
    }
}
