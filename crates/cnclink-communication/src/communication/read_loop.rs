//! Background reader
//!
//! A single named thread owns the read side of the transport for the whole
//! life of a connection. Every line it reads is classified and acted on:
//! acknowledgments feed the flow counters (and a pending exchange), position
//! reports update `MachineState`, error lines are logged.

use crate::communication::exchange::ExchangeSlot;
use crate::communication::flow::FlowController;
use crate::communication::transport::Transport;
use crate::firmware::marlin::codec::{self, LineKind};
use cnclink_core::{MachineState, TransportError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const SUSPENDED_NAP: Duration = Duration::from_millis(5);

/// Everything the reader acts on
#[derive(Clone)]
pub struct ReaderContext {
    /// Line channel to read from
    pub transport: Arc<dyn Transport>,
    /// Acknowledgment accounting
    pub flow: Arc<FlowController>,
    /// Pending synchronous exchange, if any
    pub exchange: Arc<ExchangeSlot>,
    /// Shared machine state
    pub state: Arc<MachineState>,
    /// Bound of one read call
    pub read_timeout: Duration,
    /// Pause after a read error
    pub backoff: Duration,
}

#[derive(Debug, Default)]
struct Control {
    shutdown: AtomicBool,
    suspensions: AtomicUsize,
    lines: AtomicU64,
    read_errors: AtomicU64,
}

/// Handle to the running reader thread
pub struct ReadLoop {
    control: Arc<Control>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReadLoop {
    /// Start the reader thread
    pub fn spawn(ctx: ReaderContext) -> std::io::Result<Self> {
        let control = Arc::new(Control::default());
        let handle = {
            let control = control.clone();
            std::thread::Builder::new()
                .name("cnclink-reader".to_string())
                .spawn(move || run(ctx, control))?
        };
        Ok(Self {
            control,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Stop unsolicited reads until the returned guard is dropped
    pub fn suspend(&self) -> ReaderSuspension {
        self.control.suspensions.fetch_add(1, Ordering::SeqCst);
        ReaderSuspension {
            control: self.control.clone(),
        }
    }

    /// Whether reads are currently suspended
    pub fn is_suspended(&self) -> bool {
        self.control.suspensions.load(Ordering::SeqCst) > 0
    }

    /// Lines handled so far
    pub fn lines_handled(&self) -> u64 {
        self.control.lines.load(Ordering::Relaxed)
    }

    /// Read errors absorbed so far
    pub fn read_errors(&self) -> u64 {
        self.control.read_errors.load(Ordering::Relaxed)
    }

    /// Whether the thread is still running
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Ask the thread to exit and wait for it
    pub fn shutdown(&self) {
        self.control.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                tracing::error!("Reader thread panicked");
            }
        }
    }
}

impl Drop for ReadLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Keeps the reader suspended while alive
#[must_use = "the reader resumes as soon as the suspension is dropped"]
pub struct ReaderSuspension {
    control: Arc<Control>,
}

impl Drop for ReaderSuspension {
    fn drop(&mut self) {
        self.control.suspensions.fetch_sub(1, Ordering::SeqCst);
    }
}

fn run(ctx: ReaderContext, control: Arc<Control>) {
    tracing::debug!("Reader started on {}", ctx.transport.name());

    while !control.shutdown.load(Ordering::SeqCst) {
        if control.suspensions.load(Ordering::SeqCst) > 0 {
            std::thread::sleep(SUSPENDED_NAP);
            continue;
        }

        match ctx.transport.read_line(ctx.read_timeout) {
            Ok(Some(line)) => {
                control.lines.fetch_add(1, Ordering::Relaxed);
                handle_line(&ctx, &line);
            }
            Ok(None) => {}
            Err(TransportError::Disconnected) => {
                tracing::info!("Transport {} closed, reader exiting", ctx.transport.name());
                break;
            }
            Err(e) => {
                control.read_errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Error in read loop: {}", e);
                std::thread::sleep(ctx.backoff);
            }
        }
    }

    tracing::debug!("Reader stopped");
}

/// Act on one received line
pub fn handle_line(ctx: &ReaderContext, line: &str) {
    tracing::debug!("<<< {}", line);

    match codec::classify(line) {
        LineKind::Acknowledgment => {
            ctx.exchange.on_ack(line, || ctx.flow.acknowledge());
        }
        LineKind::PositionReport => {
            match codec::parse_position(line) {
                Ok(update) => ctx.state.update_position(update),
                Err(e) => tracing::warn!("Discarding position report: {}", e),
            }
            ctx.exchange.on_line(line);
        }
        LineKind::ErrorLine => {
            tracing::warn!("Controller error: {}", line);
            ctx.exchange.on_line(line);
        }
        LineKind::Unclassified => ctx.exchange.on_line(line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::simulator::{SimulatedFirmware, SimulatorOptions};
    use cnclink_core::MachinePosition;
    use std::time::Instant;

    fn context(transport: Arc<dyn Transport>) -> ReaderContext {
        ReaderContext {
            transport,
            flow: Arc::new(FlowController::new(4)),
            exchange: Arc::new(ExchangeSlot::new()),
            state: Arc::new(MachineState::new()),
            read_timeout: Duration::from_millis(10),
            backoff: Duration::from_millis(5),
        }
    }

    fn wait_for(mut pred: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if pred() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_handle_line_routes_by_kind() {
        let sim = Arc::new(SimulatedFirmware::new(SimulatorOptions::default()));
        let ctx = context(sim);
        ctx.state
            .update_position(cnclink_core::PartialPosition::new().with(cnclink_core::Axis::X, 5.0));

        ctx.flow.record_sent();
        handle_line(&ctx, "ok");
        assert_eq!(ctx.flow.counters().acknowledged, 1);

        handle_line(&ctx, "X:1.00 Y:2.00 Z:3.00 E:4.00 Count X:0 Y:0 Z:0");
        assert_eq!(ctx.state.position(), MachinePosition::new(1.0, 2.0, 3.0, 4.0));

        handle_line(&ctx, "X:9.00 Y:oops");
        assert_eq!(ctx.state.position(), MachinePosition::new(1.0, 2.0, 3.0, 4.0));

        handle_line(&ctx, "Error:Unknown command");
        assert_eq!(ctx.flow.counters().acknowledged, 1);
    }

    #[test]
    fn test_survives_transient_read_errors() {
        let sim = Arc::new(SimulatedFirmware::new(SimulatorOptions::default()));
        sim.fail_reads(3);
        let ctx = context(sim.clone());
        let reader = ReadLoop::spawn(ctx.clone()).unwrap();

        ctx.flow.record_sent();
        sim.write_line("G0 X1").unwrap();
        assert!(wait_for(|| ctx.flow.counters().acknowledged == 1));
        assert_eq!(reader.read_errors(), 3);
        assert!(reader.is_running());

        reader.shutdown();
        assert!(!reader.is_running());
    }

    #[test]
    fn test_suspension_holds_back_reads() {
        let sim = Arc::new(SimulatedFirmware::new(SimulatorOptions::default()));
        let ctx = context(sim.clone());
        let reader = ReadLoop::spawn(ctx.clone()).unwrap();

        let guard = reader.suspend();
        assert!(reader.is_suspended());
        ctx.flow.record_sent();
        sim.write_line("G0 X1").unwrap();
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(ctx.flow.counters().acknowledged, 0);

        drop(guard);
        assert!(!reader.is_suspended());
        assert!(wait_for(|| ctx.flow.counters().acknowledged == 1));
    }

    #[test]
    fn test_exits_when_transport_closes() {
        let sim = Arc::new(SimulatedFirmware::new(SimulatorOptions::default()));
        let reader = ReadLoop::spawn(context(sim.clone())).unwrap();
        sim.close();
        assert!(wait_for(|| !reader.is_running()));
    }
}
