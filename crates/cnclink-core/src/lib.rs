//! # CncLink Core
//!
//! Core types, errors and shared state for CncLink.
//! Provides the machine data model and the synchronized `MachineState`
//! that the reader, executor, job runner and observers share.

pub mod data;
pub mod error;
pub mod state;

pub use data::{Axis, JobDescriptor, MachinePosition, MachineSnapshot, PartialPosition};

pub use error::{ConnectionError, Error, JobError, ProtocolError, Result, TransportError};

pub use state::{MachineState, STATUS_DISCONNECTED, STATUS_IDLE};
