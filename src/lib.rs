//! # CncLink
//!
//! Control core for Marlin-driven CNC machines. Finds the board on a
//! serial port, runs jog and homing sequences, and streams generated
//! G-code while keeping a bounded number of commands in flight.
//!
//! ## Architecture
//!
//! CncLink is organized as a workspace with multiple crates:
//!
//! 1. **cnclink-core** - Positions, machine state, job descriptors, errors
//! 2. **cnclink-settings** - Controller configuration (TOML/JSON)
//! 3. **cnclink-communication** - Transports, discovery, line codec, flow
//!    control, command executor and job streaming
//! 4. **cnclink** - Command-line front end that ties them together

pub use cnclink_communication::{
    communication, firmware, list_ports, Connection, EndpointOpener, FlowCounters, JobOutcome,
    JobPhase, LineKind, MarlinController, SerialOpener, SerialPortInfo, SimulatedFirmware,
    SimulatedOpener, SimulatorOptions, Transport, NOT_CONNECTED, NO_RESPONSE,
};

pub use cnclink_core::{
    Axis, ConnectionError, Error, JobDescriptor, JobError, MachinePosition, MachineSnapshot,
    MachineState, PartialPosition, ProtocolError, Result, TransportError,
};

pub use cnclink_settings::{ControllerConfig, FlowSettings, MotionSettings, SerialSettings};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - Console output with pretty formatting
/// - RUST_LOG environment variable support
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(tracing::Level::INFO.to_string()));

    // Reader thread names make the interleaving of >>> and <<< lines readable
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_line_number(true)
        .pretty();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {}", e))?;

    Ok(())
}
