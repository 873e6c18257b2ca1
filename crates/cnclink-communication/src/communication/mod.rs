//! Communication layer
//!
//! Line transports (serial and simulated), endpoint discovery, the
//! background reader, acknowledgment flow control and synchronous
//! command exchanges.

pub mod connection;
pub mod discovery;
pub mod exchange;
pub mod flow;
pub mod read_loop;
pub mod serial;
pub mod signals;
pub mod simulator;
pub mod transport;

pub use connection::Connection;
pub use discovery::{discover, DiscoveredEndpoint};
pub use exchange::ExchangeSlot;
pub use flow::{FlowController, FlowCounters, WaitOutcome};
pub use read_loop::{ReadLoop, ReaderContext, ReaderSuspension};
pub use serial::{list_ports, SerialOpener, SerialPortInfo, SerialTransport};
pub use signals::{JobPhase, JobSignals};
pub use simulator::{SimulatedFirmware, SimulatedOpener, SimulatorOptions, WriteRecord};
pub use transport::{EndpointOpener, LineBuffer, Transport};
