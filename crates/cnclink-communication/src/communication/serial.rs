//! Serial port communication implementation
//!
//! Provides the hardware `Transport` for a firmware attached via USB or
//! RS-232, plus port enumeration used by endpoint discovery.

use crate::communication::transport::{EndpointOpener, LineBuffer, Transport};
use cnclink_core::{ConnectionError, TransportError};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    /// Create a new port info
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
            manufacturer: None,
            vid: None,
            pid: None,
        }
    }

    /// Set manufacturer
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Set USB IDs
    pub fn with_usb_ids(mut self, vid: u16, pid: u16) -> Self {
        self.vid = Some(vid);
        self.pid = Some(pid);
        self
    }
}

/// List serial ports that could host a motion controller
///
/// Filters to CNC controller patterns:
/// - Windows: COM* (e.g., COM1, COM3)
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<SerialPortInfo>, ConnectionError> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        ConnectionError::Enumeration {
            reason: e.to_string(),
        }
    })?;

    Ok(ports
        .iter()
        .filter(|port| is_valid_cnc_port(&port.port_name))
        .map(|port| {
            let info = SerialPortInfo::new(&port.port_name, get_port_description(port));
            match &port.port_type {
                serialport::SerialPortType::UsbPort(usb_info) => {
                    let info = info.with_usb_ids(usb_info.vid, usb_info.pid);
                    match &usb_info.manufacturer {
                        Some(mfg) => info.with_manufacturer(mfg),
                        None => info,
                    }
                }
                _ => info,
            }
        })
        .collect())
}

/// Check if a port name matches CNC controller patterns
fn is_valid_cnc_port(port_name: &str) -> bool {
    if let Some(number) = port_name.strip_prefix("COM") {
        return !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());
    }

    if port_name.starts_with("/dev/ttyUSB") || port_name.starts_with("/dev/ttyACM") {
        return true;
    }

    port_name.starts_with("/dev/cu.usbserial-") || port_name.starts_with("/dev/cu.usbmodem")
}

/// Get a user-friendly description for a port
fn get_port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb_info) => {
            format!(
                "USB {} {}",
                usb_info.manufacturer.as_deref().unwrap_or("Device"),
                usb_info.product.as_deref().unwrap_or("Serial Port")
            )
        }
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

struct ReadSide {
    port: Box<dyn serialport::SerialPort>,
    buffer: LineBuffer,
}

/// Serial `Transport` backed by the `serialport` crate
///
/// The port is cloned so that the reader thread and writers never contend
/// for the same handle.
pub struct SerialTransport {
    name: String,
    reader: Mutex<ReadSide>,
    writer: Mutex<Box<dyn serialport::SerialPort>>,
    closed: AtomicBool,
}

impl SerialTransport {
    /// Open a port. `read_slice` bounds each underlying read call.
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        read_slice: Duration,
    ) -> Result<Self, ConnectionError> {
        let failed = |e: serialport::Error| ConnectionError::FailedToOpen {
            port: port_name.to_string(),
            reason: e.to_string(),
        };

        let port = serialport::new(port_name, baud_rate)
            .timeout(read_slice)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| {
                tracing::warn!("Failed to open serial port {}: {}", port_name, e);
                failed(e)
            })?;
        let writer = port.try_clone().map_err(failed)?;

        Ok(Self {
            name: port_name.to_string(),
            reader: Mutex::new(ReadSide {
                port,
                buffer: LineBuffer::new(),
            }),
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
        })
    }
}

impl Transport for SerialTransport {
    fn write_line(&self, line: &str) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Disconnected);
        }
        let mut writer = self.writer.lock();
        let framed = format!("{}\n", line.trim());
        writer
            .write_all(framed.as_bytes())
            .and_then(|_| writer.flush())
            .map_err(|e| TransportError::WriteFailed {
                command: line.to_string(),
                reason: e.to_string(),
            })
    }

    fn read_line(&self, timeout: Duration) -> Result<Option<String>, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Disconnected);
        }
        let deadline = Instant::now() + timeout;
        let mut side = self.reader.lock();
        let mut chunk = [0u8; 256];

        loop {
            if let Some(line) = side.buffer.next_line() {
                return Ok(Some(line));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            match side.port.read(&mut chunk) {
                Ok(0) => {}
                Ok(n) => side.buffer.push(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Opens real serial ports for discovery
#[derive(Debug, Clone)]
pub struct SerialOpener {
    read_slice: Duration,
}

impl SerialOpener {
    /// Create an opener whose transports read in `read_slice` chunks
    pub fn new(read_slice: Duration) -> Self {
        Self { read_slice }
    }
}

impl EndpointOpener for SerialOpener {
    fn candidates(&self) -> Result<Vec<String>, ConnectionError> {
        Ok(list_ports()?.into_iter().map(|p| p.port_name).collect())
    }

    fn open(&self, endpoint: &str, baud_rate: u32) -> Result<Arc<dyn Transport>, ConnectionError> {
        let transport = SerialTransport::open(endpoint, baud_rate, self.read_slice)?;
        Ok(Arc::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_name_filter() {
        assert!(is_valid_cnc_port("COM3"));
        assert!(!is_valid_cnc_port("COM"));
        assert!(!is_valid_cnc_port("COMx"));
        assert!(is_valid_cnc_port("/dev/ttyACM0"));
        assert!(is_valid_cnc_port("/dev/ttyUSB1"));
        assert!(is_valid_cnc_port("/dev/cu.usbmodem14201"));
        assert!(!is_valid_cnc_port("/dev/ttyS0"));
    }

    #[test]
    fn test_open_missing_port_fails() {
        let err = SerialTransport::open("/dev/cnclink-does-not-exist", 115200, Duration::from_millis(10))
            .err()
            .unwrap();
        assert!(matches!(err, ConnectionError::FailedToOpen { .. }));
    }
}
