//! Marlin command builders

use cnclink_core::Axis;

/// Absolute positioning
pub const ABSOLUTE_MODE: &str = "G90";
/// Relative positioning
pub const RELATIVE_MODE: &str = "G91";
/// Position report request
pub const REPORT_POSITION: &str = "M114";
/// Quick stop: discard planned moves and halt
pub const QUICK_STOP: &str = "M410";
/// Home all axes
pub const HOME_ALL: &str = "G28";
/// Zero the rotary axis (reported as the extruder)
pub const ZERO_ROTARY: &str = "G92 E0";

/// SD card: initialize
pub const SD_INIT: &str = "M21";
/// SD card: list files
pub const SD_LIST: &str = "M20";
/// SD card: finish writing
pub const SD_END_WRITE: &str = "M29";
/// SD card: start or resume the selected file
pub const SD_START: &str = "M24";
/// SD card: pause
pub const SD_PAUSE: &str = "M25";
/// SD card: report progress
pub const SD_STATUS: &str = "M27";
/// SD card: abort
pub const SD_ABORT: &str = "M524";

/// Format a number without trailing zeros ("10", "-2.5", "0.125")
pub fn fmt_num(value: f64) -> String {
    let text = format!("{:.4}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    match text {
        "" | "-0" => "0".to_string(),
        other => other.to_string(),
    }
}

/// Single-axis controlled move, e.g. `G1 X10 F1000`
pub fn linear_move(axis: Axis, distance: f64, feed_rate: f64) -> String {
    format!(
        "G1 {}{} F{}",
        axis.letter(),
        fmt_num(distance),
        fmt_num(feed_rate)
    )
}

/// Combined X/Y move producing a true diagonal
pub fn linear_move_xy(dx: f64, dy: f64, feed_rate: f64) -> String {
    format!(
        "G1 X{} Y{} F{}",
        fmt_num(dx),
        fmt_num(dy),
        fmt_num(feed_rate)
    )
}

/// Home one axis, e.g. `G28 X`
pub fn home_axis(axis: Axis) -> String {
    format!("G28 {}", axis.letter())
}

/// SD card: begin writing `name`
pub fn sd_begin_write(name: &str) -> String {
    format!("M28 {}", name)
}

/// SD card: select `name`
pub fn sd_select(name: &str) -> String {
    format!("M23 {}", name)
}

/// Whether a prepared command is a homing command (`G28`, any axes)
pub fn is_homing(command: &str) -> bool {
    command_word(command) == Some(('G', 28))
}

/// Whether a prepared command is a dwell (`G4`)
pub fn is_dwell(command: &str) -> bool {
    command_word(command) == Some(('G', 4))
}

/// Leading command letter and number: `G28X` and `g28 x` both give `('G', 28)`
fn command_word(command: &str) -> Option<(char, u32)> {
    let mut chars = command.trim_start().chars();
    let letter = chars.next()?.to_ascii_uppercase();
    let digits: String = chars.take_while(|c| c.is_ascii_digit()).collect();
    Some((letter, digits.parse().ok()?))
}

/// Normalize program lines for sending: trim, cut inline `;` comments and
/// drop blank lines and whole-line comments (`;`, `#` or `(`).
pub fn prepare_program<S: AsRef<str>>(lines: &[S]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|raw| {
            let line = raw.as_ref().trim();
            let line = match line.find(';') {
                Some(idx) => line[..idx].trim(),
                None => line,
            };
            if line.is_empty() || line.starts_with('#') || line.starts_with('(') {
                None
            } else {
                Some(line.to_string())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_num() {
        assert_eq!(fmt_num(10.0), "10");
        assert_eq!(fmt_num(-2.5), "-2.5");
        assert_eq!(fmt_num(0.125), "0.125");
        assert_eq!(fmt_num(-0.0), "0");
        assert_eq!(fmt_num(1500.0), "1500");
    }

    #[test]
    fn test_moves() {
        assert_eq!(linear_move(Axis::Z, -1.0, 300.0), "G1 Z-1 F300");
        assert_eq!(linear_move_xy(5.0, -5.0, 1000.0), "G1 X5 Y-5 F1000");
        assert_eq!(home_axis(Axis::Y), "G28 Y");
    }

    #[test]
    fn test_classification() {
        assert!(is_homing("G28"));
        assert!(is_homing("g28 X Y"));
        assert!(!is_homing("G280"));
        assert!(is_dwell("G4 P500"));
        assert!(is_dwell("G04 S1"));
        assert!(!is_dwell("G40"));
        assert!(is_homing("G28X"));
        assert!(is_dwell("G4P500"));
        assert!(!is_homing("M28 job.gco"));
        assert!(!is_dwell("G"));
    }

    #[test]
    fn test_prepare_program() {
        let program = [
            "  G21 ",
            "",
            "; header comment",
            "(setup)",
            "# note",
            "G1 X10 ; move",
            "M5",
        ];
        assert_eq!(prepare_program(&program), vec!["G21", "G1 X10", "M5"]);
    }
}
