//! Correlation of a synchronous command with its response
//!
//! The reader thread is the only consumer of incoming lines. A caller that
//! wants the response to one command registers a pending exchange here
//! before writing it; the reader then routes lines into it until the
//! command's own acknowledgment arrives.
//!
//! Acknowledgments are matched by position: a command written while `n`
//! others are in flight is answered by the `n + 1`-th acknowledgment after
//! registration. Earlier acknowledgments, and any lines before them, belong
//! to those other commands and are skipped.

use parking_lot::Mutex;
use tokio::sync::oneshot;

#[derive(Debug)]
struct Pending {
    acks_to_skip: u64,
    lines: Vec<String>,
    reply: oneshot::Sender<Vec<String>>,
}

/// At most one pending exchange, fed by the reader thread
#[derive(Debug, Default)]
pub struct ExchangeSlot {
    pending: Mutex<Option<Pending>>,
}

impl ExchangeSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an exchange. `in_flight` is read while the slot is locked so
    /// no acknowledgment can slip between the read and the registration.
    ///
    /// A previous exchange still registered is abandoned.
    pub fn begin<F>(&self, in_flight: F) -> oneshot::Receiver<Vec<String>>
    where
        F: FnOnce() -> u64,
    {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock();
        *pending = Some(Pending {
            acks_to_skip: in_flight(),
            lines: Vec::new(),
            reply: tx,
        });
        rx
    }

    /// Whether an exchange is registered
    pub fn is_active(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Route an acknowledgment. `count` performs the flow accounting under
    /// the slot lock and reports whether the acknowledgment was counted.
    pub fn on_ack<F>(&self, line: &str, count: F)
    where
        F: FnOnce() -> bool,
    {
        let mut slot = self.pending.lock();
        // an uncounted acknowledgment answers nothing that is in flight
        if !count() {
            return;
        }
        let Some(pending) = slot.as_mut() else {
            return;
        };
        if pending.acks_to_skip > 0 {
            pending.acks_to_skip -= 1;
            return;
        }
        if let Some(mut done) = slot.take() {
            done.lines.push(line.to_string());
            // the caller may already have given up
            let _ = done.reply.send(done.lines);
        }
    }

    /// Route any non-acknowledgment line
    pub fn on_line(&self, line: &str) {
        let mut slot = self.pending.lock();
        if let Some(pending) = slot.as_mut() {
            if pending.acks_to_skip == 0 {
                pending.lines.push(line.to_string());
            }
        }
    }

    /// Abandon the registered exchange, returning what it collected so far
    pub fn cancel(&self) -> Vec<String> {
        self.pending
            .lock()
            .take()
            .map(|p| p.lines)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completes_on_own_ack() {
        let slot = ExchangeSlot::new();
        let mut rx = slot.begin(|| 0);
        slot.on_line("X:1.00 Y:0.00 Z:0.00 E:0.00 Count X:0 Y:0 Z:0");
        slot.on_ack("ok", || true);
        let lines = rx.try_recv().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "ok");
        assert!(!slot.is_active());
    }

    #[test]
    fn test_skips_acks_of_earlier_commands() {
        let slot = ExchangeSlot::new();
        let mut rx = slot.begin(|| 2);
        slot.on_line("echo:busy");
        slot.on_ack("ok", || true);
        slot.on_ack("ok", || true);
        assert!(rx.try_recv().is_err());
        slot.on_line("FIRMWARE_NAME:Marlin");
        slot.on_ack("ok", || true);
        assert_eq!(rx.try_recv().unwrap(), vec!["FIRMWARE_NAME:Marlin", "ok"]);
    }

    #[test]
    fn test_uncounted_ack_does_not_consume_skip() {
        let slot = ExchangeSlot::new();
        let mut rx = slot.begin(|| 1);
        slot.on_ack("ok", || false);
        assert!(rx.try_recv().is_err());
        slot.on_ack("ok", || true);
        slot.on_ack("ok", || true);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_cancel_returns_partial_lines() {
        let slot = ExchangeSlot::new();
        let _rx = slot.begin(|| 0);
        slot.on_line("echo:SD card ok");
        assert_eq!(slot.cancel(), vec!["echo:SD card ok"]);
        assert!(slot.cancel().is_empty());
    }
}
