//! Acknowledgment-window flow control
//!
//! The firmware answers every command with exactly one `ok`. Keeping at most
//! `buffer_size` commands un-acknowledged prevents its input buffer from
//! overflowing while still letting the planner look ahead.
//!
//! Counters only grow between resets and always satisfy
//! `acknowledged <= sent`; `in_flight` is their difference.

use crate::communication::signals::JobSignals;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Result of a bounded wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The awaited condition holds
    Ready,
    /// A stop request interrupted the wait
    Stopped,
    /// The wait limit elapsed
    TimedOut,
}

/// Sent/acknowledged counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowCounters {
    /// Commands written
    pub sent: u64,
    /// Acknowledgments received
    pub acknowledged: u64,
}

impl FlowCounters {
    /// Commands sent but not yet acknowledged
    pub fn in_flight(&self) -> u64 {
        self.sent - self.acknowledged
    }
}

#[derive(Debug)]
struct Inner {
    counters: FlowCounters,
    last_ack: Instant,
}

/// Flow controller shared by every sender and the reader thread
#[derive(Debug)]
pub struct FlowController {
    capacity: u64,
    inner: Mutex<Inner>,
    acked: Notify,
}

impl FlowController {
    /// Create a controller with a window of `capacity` commands (at least 1)
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                counters: FlowCounters::default(),
                last_ack: Instant::now(),
            }),
            acked: Notify::new(),
        }
    }

    /// Window size
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Snapshot of the counters
    pub fn counters(&self) -> FlowCounters {
        self.inner.lock().counters
    }

    /// Commands currently in flight
    pub fn in_flight(&self) -> u64 {
        self.inner.lock().counters.in_flight()
    }

    /// Whether another command fits in the window
    pub fn has_room(&self) -> bool {
        self.in_flight() < self.capacity
    }

    /// Count a command about to be written
    pub fn record_sent(&self) {
        let mut inner = self.inner.lock();
        if inner.counters.in_flight() == 0 {
            inner.last_ack = Instant::now();
        }
        inner.counters.sent += 1;
    }

    /// Undo `record_sent` for a write that failed
    pub fn cancel_sent(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.counters.sent > inner.counters.acknowledged {
                inner.counters.sent -= 1;
            }
        }
        self.acked.notify_waiters();
    }

    /// Count one acknowledgment.
    ///
    /// Returns `false` for an acknowledgment with nothing in flight, which
    /// is ignored.
    pub fn acknowledge(&self) -> bool {
        let counted = {
            let mut inner = self.inner.lock();
            if inner.counters.acknowledged < inner.counters.sent {
                inner.counters.acknowledged += 1;
                inner.last_ack = Instant::now();
                true
            } else {
                false
            }
        };
        if counted {
            self.acked.notify_waiters();
        } else {
            tracing::debug!("Ignoring acknowledgment with nothing in flight");
        }
        counted
    }

    /// Treat the oldest in-flight command as acknowledged
    pub fn force_resync(&self) -> FlowCounters {
        let counters = {
            let mut inner = self.inner.lock();
            if inner.counters.acknowledged < inner.counters.sent {
                inner.counters.acknowledged += 1;
            }
            inner.last_ack = Instant::now();
            inner.counters
        };
        self.acked.notify_waiters();
        counters
    }

    /// Zero both counters
    pub fn reset(&self) {
        {
            let mut inner = self.inner.lock();
            inner.counters = FlowCounters::default();
            inner.last_ack = Instant::now();
        }
        self.acked.notify_waiters();
    }

    fn since_last_ack(&self) -> Duration {
        self.inner.lock().last_ack.elapsed()
    }

    /// Wait until `pred` holds, re-checking on every acknowledgment and at
    /// least once per `slice`, for at most `limit`.
    pub async fn wait_until<F>(
        &self,
        signals: &JobSignals,
        limit: Duration,
        slice: Duration,
        pred: F,
    ) -> WaitOutcome
    where
        F: Fn(&FlowCounters) -> bool,
    {
        let deadline = Instant::now() + limit;
        loop {
            let notified = self.acked.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if signals.is_stop_requested() {
                return WaitOutcome::Stopped;
            }
            if pred(&self.counters()) {
                return WaitOutcome::Ready;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            let nap = slice.min(deadline - now);

            tokio::select! {
                _ = &mut notified => {}
                _ = signals.stopped() => {}
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }

    /// Wait for a free slot in the window.
    ///
    /// When no acknowledgment has arrived for `stuck_timeout`, one is assumed
    /// lost: the counters are resynchronized and `TimedOut` is returned so
    /// the caller proceeds.
    pub async fn wait_for_slot(
        &self,
        signals: &JobSignals,
        slice: Duration,
        stuck_timeout: Duration,
    ) -> WaitOutcome {
        let capacity = self.capacity;
        loop {
            let remaining = stuck_timeout.saturating_sub(self.since_last_ack());
            let outcome = self
                .wait_until(signals, remaining, slice, |c| c.in_flight() < capacity)
                .await;
            if outcome != WaitOutcome::TimedOut {
                return outcome;
            }
            if self.since_last_ack() < stuck_timeout {
                // an acknowledgment arrived right at the deadline
                continue;
            }
            let counters = self.force_resync();
            tracing::warn!(
                "No acknowledgment for {:?}, assuming one was lost (sent={}, acknowledged={})",
                stuck_timeout,
                counters.sent,
                counters.acknowledged
            );
            return WaitOutcome::TimedOut;
        }
    }

    /// Wait until nothing is in flight, giving up once no acknowledgment
    /// has arrived for `quiet`. Whatever is still counted then is assumed
    /// lost and discarded; the number discarded is returned.
    pub async fn settle(&self, quiet: Duration, slice: Duration) -> u64 {
        let signals = JobSignals::new();
        loop {
            let remaining = quiet.saturating_sub(self.since_last_ack());
            if self.drain(&signals, remaining, slice).await == WaitOutcome::Ready {
                return 0;
            }
            if self.since_last_ack() < quiet {
                continue;
            }
            let (discarded, counters) = {
                let mut inner = self.inner.lock();
                let discarded = inner.counters.in_flight();
                inner.counters.acknowledged = inner.counters.sent;
                inner.last_ack = Instant::now();
                (discarded, inner.counters)
            };
            self.acked.notify_waiters();
            if discarded > 0 {
                tracing::warn!(
                    "No acknowledgment for {:?}, discarding {} in flight (sent={})",
                    quiet,
                    discarded,
                    counters.sent
                );
            }
            return discarded;
        }
    }

    /// Wait until nothing is in flight
    pub async fn drain(&self, signals: &JobSignals, limit: Duration, slice: Duration) -> WaitOutcome {
        self.wait_until(signals, limit, slice, |c| c.in_flight() == 0)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters() {
        let flow = FlowController::new(2);
        assert!(flow.has_room());
        flow.record_sent();
        flow.record_sent();
        assert!(!flow.has_room());
        assert!(flow.acknowledge());
        assert_eq!(flow.in_flight(), 1);
        assert!(flow.acknowledge());
        assert!(!flow.acknowledge());
        assert_eq!(
            flow.counters(),
            FlowCounters {
                sent: 2,
                acknowledged: 2
            }
        );
    }

    #[test]
    fn test_cancel_sent() {
        let flow = FlowController::new(4);
        flow.record_sent();
        flow.cancel_sent();
        assert_eq!(flow.counters().sent, 0);
        flow.cancel_sent();
        assert_eq!(flow.counters().sent, 0);
    }

    #[test]
    fn test_resync_frees_one_slot() {
        let flow = FlowController::new(1);
        flow.record_sent();
        flow.record_sent();
        let counters = flow.force_resync();
        assert_eq!(counters.in_flight(), 1);
        flow.reset();
        assert_eq!(flow.counters(), FlowCounters::default());
    }

    #[test]
    fn test_zero_capacity_is_one() {
        assert_eq!(FlowController::new(0).capacity(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_slot_wakes_on_ack() {
        let flow = Arc::new(FlowController::new(1));
        let signals = JobSignals::new();
        flow.record_sent();

        let acker = {
            let flow = flow.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                flow.acknowledge();
            })
        };
        let started = Instant::now();
        let outcome = flow
            .wait_for_slot(&signals, Duration::from_secs(5), Duration::from_secs(10))
            .await;
        acker.await.unwrap();
        assert_eq!(outcome, WaitOutcome::Ready);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_wait_for_slot_resyncs_when_stuck() {
        let flow = FlowController::new(1);
        let signals = JobSignals::new();
        flow.record_sent();
        let outcome = flow
            .wait_for_slot(&signals, Duration::from_millis(10), Duration::from_millis(60))
            .await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert_eq!(flow.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_settle_waits_for_late_ack() {
        let flow = Arc::new(FlowController::new(4));
        flow.record_sent();
        let acker = {
            let flow = flow.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                flow.acknowledge();
            })
        };
        let discarded = flow
            .settle(Duration::from_secs(5), Duration::from_millis(10))
            .await;
        acker.await.unwrap();
        assert_eq!(discarded, 0);
        assert_eq!(flow.counters().acknowledged, 1);
    }

    #[tokio::test]
    async fn test_settle_discards_lost_acks() {
        let flow = FlowController::new(4);
        flow.record_sent();
        flow.record_sent();
        let discarded = flow
            .settle(Duration::from_millis(50), Duration::from_millis(10))
            .await;
        assert_eq!(discarded, 2);
        assert_eq!(flow.in_flight(), 0);
        assert!(!flow.acknowledge());
    }

    #[tokio::test]
    async fn test_drain_interrupted_by_stop() {
        let flow = FlowController::new(4);
        let signals = Arc::new(JobSignals::new());
        flow.record_sent();
        {
            let signals = signals.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                signals.request_stop();
            });
        }
        let outcome = flow
            .drain(&signals, Duration::from_secs(5), Duration::from_secs(1))
            .await;
        assert_eq!(outcome, WaitOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_drain_times_out() {
        let flow = FlowController::new(4);
        let signals = JobSignals::new();
        flow.record_sent();
        let outcome = flow
            .drain(&signals, Duration::from_millis(40), Duration::from_millis(10))
            .await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert_eq!(flow.in_flight(), 1);
    }
}
