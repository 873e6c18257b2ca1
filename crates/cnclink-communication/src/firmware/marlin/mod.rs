//! Marlin firmware support
//!
//! Line codec, command builders, the command executor (`MarlinController`),
//! acknowledgment-paced job streaming and SD card offload.

pub mod codec;
pub mod commands;
pub mod controller;
pub mod job;
pub mod sdcard;

pub use codec::{classify, parse_position, parse_sd_progress, LineKind};
pub use controller::{MarlinController, NOT_CONNECTED, NO_RESPONSE, STATUS_PAUSED, STATUS_RUNNING};
pub use job::{JobOutcome, JobRunner, JobTiming, STATUS_COMPLETE, STATUS_ERROR, STATUS_STOPPED};
pub use sdcard::{SD_JOB_FILE, STATUS_PAUSED_SD, STATUS_RUNNING_SD};
