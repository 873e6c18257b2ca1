//! Controller configuration
//!
//! Every tunable the control core uses is an externally supplied constant
//! collected here, grouped into sections:
//! - Serial settings (baud rate, candidate ports, identification probe)
//! - Flow settings (in-flight window and the wait/timeout tiers)
//! - Motion settings (rotary polarity, homing settle delays, job pacing)
//! - Commands issued once after a successful connect
//!
//! Configuration files may be TOML or JSON; missing keys fall back to
//! the defaults below.

use crate::error::{ConfigError, SettingsError, SettingsResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Serial link and discovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Baud rate for the firmware link
    pub baud_rate: u32,
    /// Ports to probe, in order. Empty means enumerate the system's ports
    pub candidates: Vec<String>,
    /// Time the firmware needs after the port opens (it resets on open)
    pub boot_delay_ms: u64,
    /// Identification command sent to each candidate
    pub probe_command: String,
    /// Substring the identification answer must contain
    pub firmware_signature: String,
    /// How long to wait for the identification answer
    pub probe_timeout_ms: u64,
    /// Read granularity of the background reader
    pub read_timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115200,
            candidates: Vec::new(),
            boot_delay_ms: 2000,
            probe_command: "M115".to_string(),
            firmware_signature: "FIRMWARE_NAME".to_string(),
            probe_timeout_ms: 3000,
            read_timeout_ms: 50,
        }
    }
}

/// Flow-control window and timeout tiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowSettings {
    /// Maximum commands in flight (sent but not acknowledged)
    pub buffer_size: u64,
    /// Single wait slice while the window is full
    pub wait_granularity_ms: u64,
    /// Single wait slice while draining
    pub drain_granularity_ms: u64,
    /// No acknowledgment for this long counts as a lost acknowledgment
    pub stuck_timeout_ms: u64,
    /// Drain limit around a homing command
    pub homing_timeout_ms: u64,
    /// Drain limit after a dwell command
    pub dwell_timeout_ms: u64,
    /// Drain limit at the end of a job
    pub drain_timeout_ms: u64,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            buffer_size: 4,
            wait_granularity_ms: 500,
            drain_granularity_ms: 1000,
            stuck_timeout_ms: 10_000,
            homing_timeout_ms: 60_000,
            dwell_timeout_ms: 30_000,
            drain_timeout_ms: 30_000,
        }
    }
}

/// Motion and job pacing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionSettings {
    /// Negate rotary jog distances (motor wired with reversed polarity)
    pub invert_rotary_axis: bool,
    /// Settle delay after homing one axis
    pub home_axis_settle_ms: u64,
    /// Settle delay after homing all axes
    pub home_all_settle_ms: u64,
    /// Zero the rotary axis after homing all axes
    pub zero_rotary_after_home_all: bool,
    /// How long `stop_job` waits for the runner to exit
    pub stop_join_timeout_ms: u64,
    /// Poll interval while a job is paused
    pub pause_poll_ms: u64,
    /// Back-off after a read error in the background reader
    pub reader_backoff_ms: u64,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            invert_rotary_axis: true,
            home_axis_settle_ms: 500,
            home_all_settle_ms: 2000,
            zero_rotary_after_home_all: true,
            stop_join_timeout_ms: 2000,
            pause_poll_ms: 100,
            reader_backoff_ms: 100,
        }
    }
}

/// Complete controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Serial settings
    pub serial: SerialSettings,
    /// Flow settings
    pub flow: FlowSettings,
    /// Motion settings
    pub motion: MotionSettings,
    /// Best-effort tuning commands sent after connecting
    pub post_connect_commands: Vec<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            serial: SerialSettings::default(),
            flow: FlowSettings::default(),
            motion: MotionSettings::default(),
            post_connect_commands: vec![
                "M114".to_string(),
                "M204 P1000 T1000".to_string(),
                "M205 X10 Y10 Z10".to_string(),
            ],
        }
    }
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

impl ControllerConfig {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Default config file location (`<config dir>/cnclink/controller.toml`)
    pub fn default_path() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("cnclink").join("controller.toml"))
            .ok_or_else(|| {
                SettingsError::ConfigDirectory("no configuration directory on this platform".into())
            })
    }

    /// Load config from file (JSON or TOML)
    pub fn load(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::LoadError(format!("{}: {}", path.display(), e)))?;

        let config: Self = match extension(path) {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
            Format::Unknown(ext) => return Err(ConfigError::UnsupportedFormat(ext).into()),
        };

        config.validate()?;
        tracing::debug!("Loaded controller config from {}", path.display());
        Ok(config)
    }

    /// Load config from file, or fall back to defaults if it does not exist
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!(
                "No config at {}, using built-in defaults",
                path.display()
            );
            Ok(Self::default())
        }
    }

    /// Save config to file (JSON or TOML)
    pub fn save(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match extension(path) {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)
                .map_err(|e| SettingsError::SaveError(e.to_string()))?,
            Format::Unknown(ext) => return Err(ConfigError::UnsupportedFormat(ext).into()),
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
            .map_err(|e| SettingsError::SaveError(format!("{}: {}", path.display(), e)))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        if self.serial.baud_rate == 0 {
            return Err(invalid("serial.baud_rate", "must be > 0"));
        }

        if self.serial.probe_command.trim().is_empty() {
            return Err(invalid("serial.probe_command", "must not be empty"));
        }

        if self.serial.firmware_signature.is_empty() {
            return Err(invalid("serial.firmware_signature", "must not be empty"));
        }

        if self.serial.read_timeout_ms == 0 {
            return Err(invalid("serial.read_timeout_ms", "must be > 0"));
        }

        if self.flow.buffer_size == 0 {
            return Err(ConfigError::ValueOutOfRange {
                key: "flow.buffer_size".into(),
                value: "0".into(),
            }
            .into());
        }

        if self.flow.wait_granularity_ms == 0 || self.flow.drain_granularity_ms == 0 {
            return Err(invalid("flow granularity", "must be > 0"));
        }

        if self.flow.stuck_timeout_ms < self.flow.wait_granularity_ms {
            return Err(invalid(
                "flow.stuck_timeout_ms",
                "must not be shorter than flow.wait_granularity_ms",
            ));
        }

        if self.motion.pause_poll_ms == 0 {
            return Err(invalid("motion.pause_poll_ms", "must be > 0"));
        }

        Ok(())
    }

    /// Baud rate
    pub fn baud_rate(&self) -> u32 {
        self.serial.baud_rate
    }

    /// In-flight window
    pub fn buffer_size(&self) -> u64 {
        self.flow.buffer_size
    }

    /// Firmware boot delay
    pub fn boot_delay(&self) -> Duration {
        ms(self.serial.boot_delay_ms)
    }

    /// Identification probe timeout
    pub fn probe_timeout(&self) -> Duration {
        ms(self.serial.probe_timeout_ms)
    }

    /// Reader read slice
    pub fn read_timeout(&self) -> Duration {
        ms(self.serial.read_timeout_ms)
    }

    /// Short wait tier (window full)
    pub fn wait_granularity(&self) -> Duration {
        ms(self.flow.wait_granularity_ms)
    }

    /// Short wait tier (draining)
    pub fn drain_granularity(&self) -> Duration {
        ms(self.flow.drain_granularity_ms)
    }

    /// Medium tier: stuck-flow recovery
    pub fn stuck_timeout(&self) -> Duration {
        ms(self.flow.stuck_timeout_ms)
    }

    /// Long tier: homing drain
    pub fn homing_timeout(&self) -> Duration {
        ms(self.flow.homing_timeout_ms)
    }

    /// Long tier: dwell drain
    pub fn dwell_timeout(&self) -> Duration {
        ms(self.flow.dwell_timeout_ms)
    }

    /// Long tier: end-of-job drain
    pub fn drain_timeout(&self) -> Duration {
        ms(self.flow.drain_timeout_ms)
    }

    /// Settle delay after single-axis homing
    pub fn home_axis_settle(&self) -> Duration {
        ms(self.motion.home_axis_settle_ms)
    }

    /// Settle delay after homing all axes
    pub fn home_all_settle(&self) -> Duration {
        ms(self.motion.home_all_settle_ms)
    }

    /// Bound on waiting for the job runner to exit
    pub fn stop_join_timeout(&self) -> Duration {
        ms(self.motion.stop_join_timeout_ms)
    }

    /// Pause poll interval
    pub fn pause_poll(&self) -> Duration {
        ms(self.motion.pause_poll_ms)
    }

    /// Reader back-off after an I/O error
    pub fn reader_backoff(&self) -> Duration {
        ms(self.motion.reader_backoff_ms)
    }
}

enum Format {
    Json,
    Toml,
    Unknown(String),
}

fn extension(path: &Path) -> Format {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Format::Json,
        Some("toml") => Format::Toml,
        Some(other) => Format::Unknown(other.to_string()),
        None => Format::Unknown(String::new()),
    }
}

fn invalid(key: &str, reason: &str) -> SettingsError {
    SettingsError::InvalidSetting {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
