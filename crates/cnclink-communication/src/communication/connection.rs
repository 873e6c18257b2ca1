//! Open connection to a controller
//!
//! Owns the transport, the background reader, the flow counters and the
//! exchange slot for one connected board. All writes go through `send` so
//! every command is counted exactly once.

use crate::communication::discovery::DiscoveredEndpoint;
use crate::communication::exchange::ExchangeSlot;
use crate::communication::flow::FlowController;
use crate::communication::read_loop::{ReadLoop, ReaderContext, ReaderSuspension};
use crate::communication::transport::Transport;
use cnclink_core::{ConnectionError, MachineState, TransportError};
use cnclink_settings::ControllerConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A connected board
pub struct Connection {
    endpoint: String,
    transport: Arc<dyn Transport>,
    flow: Arc<FlowController>,
    exchange: Arc<ExchangeSlot>,
    exchange_lock: tokio::sync::Mutex<()>,
    reader: ReadLoop,
    streaming: AtomicBool,
    settle_quiet: Duration,
    settle_slice: Duration,
}

impl Connection {
    /// Take over a discovered endpoint and start reading from it
    pub fn open(
        discovered: DiscoveredEndpoint,
        state: Arc<MachineState>,
        config: &ControllerConfig,
    ) -> Result<Self, ConnectionError> {
        let DiscoveredEndpoint {
            endpoint,
            transport,
        } = discovered;
        let flow = Arc::new(FlowController::new(config.buffer_size()));
        let exchange = Arc::new(ExchangeSlot::new());

        let reader = ReadLoop::spawn(ReaderContext {
            transport: transport.clone(),
            flow: flow.clone(),
            exchange: exchange.clone(),
            state,
            read_timeout: config.read_timeout(),
            backoff: config.reader_backoff(),
        })
        .map_err(|e| ConnectionError::FailedToOpen {
            port: endpoint.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            endpoint,
            transport,
            flow,
            exchange,
            exchange_lock: tokio::sync::Mutex::new(()),
            reader,
            streaming: AtomicBool::new(false),
            settle_quiet: config.stuck_timeout(),
            settle_slice: config.wait_granularity(),
        })
    }

    /// Endpoint name
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Flow counters of this connection
    pub fn flow(&self) -> &Arc<FlowController> {
        &self.flow
    }

    /// Write one command and count it as in flight
    pub fn send(&self, command: &str) -> Result<(), TransportError> {
        let command = command.trim();
        self.flow.record_sent();
        match self.transport.write_line(command) {
            Ok(()) => {
                if self.is_streaming() {
                    tracing::debug!(">>> {}", command);
                } else {
                    tracing::info!(">>> {}", command);
                }
                Ok(())
            }
            Err(e) => {
                self.flow.cancel_sent();
                tracing::error!("Error sending command '{}': {}", command, e);
                Err(e)
            }
        }
    }

    /// Mark whether a job is streaming (quieter send logging)
    pub fn set_streaming(&self, streaming: bool) {
        self.streaming.store(streaming, Ordering::Relaxed);
    }

    /// Whether a job is streaming
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Relaxed)
    }

    /// Send one command and collect the lines answering it, up to and
    /// including its acknowledgment.
    ///
    /// Exchanges never interleave. Outside a job, commands still in flight
    /// are waited out first; any whose acknowledgment stays missing for
    /// `stuck_timeout` (at most `timeout`) are written off so a lost `ok`
    /// cannot be taken for this command's. On timeout whatever arrived so
    /// far is returned, possibly nothing.
    pub async fn exchange(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<Vec<String>, TransportError> {
        let _exclusive = self.exchange_lock.lock().await;

        if !self.is_streaming() {
            self.flow
                .settle(self.settle_quiet.min(timeout), self.settle_slice)
                .await;
        }
        let reply = self.exchange.begin(|| self.flow.in_flight());
        if let Err(e) = self.send(command) {
            self.exchange.cancel();
            return Err(e);
        }

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(lines)) => Ok(lines),
            Ok(Err(_)) => Ok(self.exchange.cancel()),
            Err(_) => {
                let partial = self.exchange.cancel();
                tracing::warn!(
                    "No acknowledgment for '{}' within {:?} ({} line(s) received)",
                    command,
                    timeout,
                    partial.len()
                );
                Ok(partial)
            }
        }
    }

    /// Hold back the background reader, e.g. to read the transport directly
    pub fn suspend_reader(&self) -> ReaderSuspension {
        self.reader.suspend()
    }

    /// Underlying transport
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Whether the background reader is alive
    pub fn is_reading(&self) -> bool {
        self.reader.is_running()
    }

    /// Stop reading and close the transport
    pub fn close(&self) {
        self.transport.close();
        self.reader.shutdown();
        self.exchange.cancel();
        tracing::info!("Closed connection to {}", self.endpoint);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.transport.close();
    }
}
