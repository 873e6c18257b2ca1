//! Data model for the control core
//!
//! Positions are millimetres for the linear axes and degrees for the
//! rotary `A` axis.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Machine axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// X linear axis
    X,
    /// Y linear axis
    Y,
    /// Z linear axis
    Z,
    /// A rotary axis (degrees)
    A,
}

impl Axis {
    /// All axes in report order
    pub const ALL: [Axis; 4] = [Axis::X, Axis::Y, Axis::Z, Axis::A];

    /// G-code word letter for this axis
    pub fn letter(&self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
            Axis::A => 'A',
        }
    }

    /// Whether this is the rotary axis
    pub fn is_rotary(&self) -> bool {
        matches!(self, Axis::A)
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl FromStr for Axis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "X" => Ok(Axis::X),
            "Y" => Ok(Axis::Y),
            "Z" => Ok(Axis::Z),
            "A" => Ok(Axis::A),
            other => Err(format!("Unknown axis '{}'", other)),
        }
    }
}

/// Absolute machine position
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MachinePosition {
    /// X coordinate (mm)
    pub x: f64,
    /// Y coordinate (mm)
    pub y: f64,
    /// Z coordinate (mm)
    pub z: f64,
    /// A rotation (degrees)
    pub a: f64,
}

impl MachinePosition {
    /// Create a new position
    pub fn new(x: f64, y: f64, z: f64, a: f64) -> Self {
        Self { x, y, z, a }
    }

    /// Value of a single axis
    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
            Axis::A => self.a,
        }
    }

    /// Position as an `(x, y, z, a)` tuple
    pub fn as_tuple(&self) -> (f64, f64, f64, f64) {
        (self.x, self.y, self.z, self.a)
    }
}

impl fmt::Display for MachinePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "X:{:.3} Y:{:.3} Z:{:.3} A:{:.3}",
            self.x, self.y, self.z, self.a
        )
    }
}

/// Position update that carries only some axes
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PartialPosition {
    /// X coordinate (optional)
    pub x: Option<f64>,
    /// Y coordinate (optional)
    pub y: Option<f64>,
    /// Z coordinate (optional)
    pub z: Option<f64>,
    /// A rotation (optional)
    pub a: Option<f64>,
}

impl PartialPosition {
    /// Create an empty update
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set one axis
    pub fn with(mut self, axis: Axis, value: f64) -> Self {
        self.set(axis, value);
        self
    }

    /// Set one axis
    pub fn set(&mut self, axis: Axis, value: f64) {
        match axis {
            Axis::X => self.x = Some(value),
            Axis::Y => self.y = Some(value),
            Axis::Z => self.z = Some(value),
            Axis::A => self.a = Some(value),
        }
    }

    /// Get one axis if present
    pub fn get(&self, axis: Axis) -> Option<f64> {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
            Axis::A => self.a,
        }
    }

    /// Apply the supplied axes to a position, leaving the rest untouched
    pub fn apply_to(&self, pos: &MachinePosition) -> MachinePosition {
        MachinePosition {
            x: self.x.unwrap_or(pos.x),
            y: self.y.unwrap_or(pos.y),
            z: self.z.unwrap_or(pos.z),
            a: self.a.unwrap_or(pos.a),
        }
    }

    /// Number of axes present
    pub fn axis_count(&self) -> usize {
        Axis::ALL.iter().filter(|a| self.get(**a).is_some()).count()
    }

    /// Whether no axis is present
    pub fn is_empty(&self) -> bool {
        self.axis_count() == 0
    }
}

/// Point-in-time copy of the machine state, as seen by observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSnapshot {
    /// Current position
    pub position: MachinePosition,
    /// Machine is executing something
    pub busy: bool,
    /// Job is paused
    pub paused: bool,
    /// Human readable status line
    pub status_text: String,
    /// Job progress in [0, 1]
    pub job_progress: f64,
    /// A job program is loaded
    pub job_loaded: bool,
    /// Name of the loaded program, if any
    pub loaded_source: Option<String>,
}

impl MachineSnapshot {
    /// Ready for new motion commands
    pub fn is_idle(&self) -> bool {
        !self.busy && !self.paused
    }

    /// Job actively running
    pub fn is_running(&self) -> bool {
        self.busy && !self.paused
    }
}

/// A program handed over by the toolpath generator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Ordered command lines
    pub commands: Vec<String>,
    /// Where the program came from (file name)
    pub source_name: Option<String>,
}

impl JobDescriptor {
    /// Create a descriptor from generated lines
    pub fn new(commands: Vec<String>, source_name: Option<String>) -> Self {
        Self {
            commands,
            source_name,
        }
    }

    /// Build a descriptor from program text, one command per line
    pub fn from_text(text: &str, source_name: Option<String>) -> Self {
        Self::new(text.lines().map(str::to_string).collect(), source_name)
    }

    /// Number of raw lines
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether there are no lines at all
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_parse() {
        assert_eq!("x".parse::<Axis>(), Ok(Axis::X));
        assert_eq!(" A ".parse::<Axis>(), Ok(Axis::A));
        assert!("E".parse::<Axis>().is_err());
        assert!(Axis::A.is_rotary());
        assert!(!Axis::Z.is_rotary());
    }

    #[test]
    fn test_partial_apply_keeps_missing_axes() {
        let pos = MachinePosition::new(1.0, 2.0, 3.0, 4.0);
        let update = PartialPosition::new().with(Axis::Z, 9.0);
        assert_eq!(update.apply_to(&pos), MachinePosition::new(1.0, 2.0, 9.0, 4.0));
        assert_eq!(update.axis_count(), 1);
        assert!(PartialPosition::new().is_empty());
    }

    #[test]
    fn test_descriptor_from_text() {
        let job = JobDescriptor::from_text("G0 X1\n\nG1 Y2 ; cut", Some("part.gcode".into()));
        assert_eq!(job.len(), 3);
        assert_eq!(job.source_name.as_deref(), Some("part.gcode"));
    }

    #[test]
    fn test_snapshot_serializes() {
        let snap = MachineSnapshot {
            position: MachinePosition::new(1.0, 0.0, 0.0, 90.0),
            busy: true,
            paused: false,
            status_text: "Running".into(),
            job_progress: 0.5,
            job_loaded: true,
            loaded_source: None,
        };
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"status_text\":\"Running\""));
        assert!(snap.is_running());
        assert!(!snap.is_idle());
    }
}
