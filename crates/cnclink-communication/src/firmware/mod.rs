//! Firmware implementations
//!
//! Supported controllers:
//! - Marlin 2.x (serial G-code with `ok` acknowledgments)

pub mod marlin;

pub use marlin::{JobOutcome, LineKind, MarlinController};
