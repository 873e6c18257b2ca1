//! # CncLink Communication
//!
//! Serial transport, line protocol, flow control and job streaming for
//! CncLink. The `MarlinController` is the entry point: it discovers and
//! connects to a board, runs jog and homing sequences and streams jobs
//! while a background reader keeps `MachineState` current.

pub mod communication;
pub mod firmware;

pub use communication::{
    discover, list_ports, Connection, DiscoveredEndpoint, EndpointOpener, FlowController,
    FlowCounters, JobPhase, JobSignals, SerialOpener, SerialPortInfo, SerialTransport,
    SimulatedFirmware, SimulatedOpener, SimulatorOptions, Transport, WaitOutcome, WriteRecord,
};

pub use firmware::marlin::{
    JobOutcome, JobRunner, JobTiming, LineKind, MarlinController, NOT_CONNECTED, NO_RESPONSE,
};
