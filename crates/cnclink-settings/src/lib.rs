//! CncLink Settings Crate
//!
//! Handles controller configuration: defaults, validation and persistence.

pub mod config;
pub mod error;

pub use config::{ControllerConfig, FlowSettings, MotionSettings, SerialSettings};
pub use error::{ConfigError, SettingsError, SettingsResult};
