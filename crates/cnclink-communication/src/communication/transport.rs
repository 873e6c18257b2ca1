//! Line transport abstraction
//!
//! A `Transport` is one duplex, newline-framed channel to the firmware.
//! Reads and writes may happen from different threads at the same time;
//! implementations guard each direction separately.

use cnclink_core::{ConnectionError, TransportError};
use std::sync::Arc;
use std::time::Duration;

/// Duplex line channel to the firmware
pub trait Transport: Send + Sync {
    /// Write one command; the line terminator is appended by the transport
    fn write_line(&self, line: &str) -> Result<(), TransportError>;

    /// Read one complete line, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when nothing complete arrived in time.
    fn read_line(&self, timeout: Duration) -> Result<Option<String>, TransportError>;

    /// Endpoint name (e.g. "/dev/ttyACM0")
    fn name(&self) -> String;

    /// Close the channel; later reads and writes fail with `Disconnected`
    fn close(&self) {}
}

/// Something that can list and open candidate endpoints
pub trait EndpointOpener: Send + Sync {
    /// Endpoints to probe, in order
    fn candidates(&self) -> Result<Vec<String>, ConnectionError>;

    /// Open one endpoint at the given baud rate
    fn open(&self, endpoint: &str, baud_rate: u32) -> Result<Arc<dyn Transport>, ConnectionError>;
}

/// Splits a byte stream into trimmed text lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes as they came off the wire
    pub fn push(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Pop the next complete, non-empty line
    pub fn next_line(&mut self) -> Option<String> {
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                return Some(line);
            }
        }
        None
    }

    /// Bytes received but not yet terminated
    pub fn partial_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
