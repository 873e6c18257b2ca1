//! Marlin Line Codec
//!
//! Classifies lines received from Marlin and decodes position reports
//! (`M114` answers) and SD print progress (`M27` answers).

use cnclink_core::{Axis, PartialPosition, ProtocolError};
use std::fmt;

/// Kind of a received line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// `ok`, with or without trailing data
    Acknowledgment,
    /// Starts with an axis/value token such as `X:10.00`
    PositionReport,
    /// Mentions "error" or "err:" in any case
    ErrorLine,
    /// Anything else (echo, busy, banners)
    Unclassified,
}

impl fmt::Display for LineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acknowledgment => write!(f, "ack"),
            Self::PositionReport => write!(f, "position"),
            Self::ErrorLine => write!(f, "error"),
            Self::Unclassified => write!(f, "other"),
        }
    }
}

const POSITION_PREFIXES: [&str; 5] = ["X:", "Y:", "Z:", "A:", "E:"];

/// Classify one trimmed line. Checks run in order: acknowledgment, position,
/// error, so `ok` lines are never treated as anything else.
pub fn classify(line: &str) -> LineKind {
    let line = line.trim();

    if line.starts_with("ok") {
        return LineKind::Acknowledgment;
    }

    let first = line.split_whitespace().next().unwrap_or("");
    if POSITION_PREFIXES.iter().any(|p| first.starts_with(p)) {
        return LineKind::PositionReport;
    }

    let lower = line.to_ascii_lowercase();
    if lower.contains("error") || lower.contains("err:") {
        return LineKind::ErrorLine;
    }

    LineKind::Unclassified
}

/// Decode a position report.
///
/// Everything from `Count` on (stepper counts) is ignored. `A:` is the
/// rotary axis; `E:` stands in for it when no `A:` token is present.
/// Unknown tokens are skipped. Any malformed value rejects the whole line,
/// so a partial update is never produced from a garbled report.
pub fn parse_position(line: &str) -> Result<PartialPosition, ProtocolError> {
    let head = match line.find("Count") {
        Some(idx) => &line[..idx],
        None => line,
    };

    let mut update = PartialPosition::new();
    let mut extruder = None;

    for token in head.split_whitespace() {
        let Some((name, value)) = token.split_once(':') else {
            continue;
        };
        let axis = match name {
            "X" => Some(Axis::X),
            "Y" => Some(Axis::Y),
            "Z" => Some(Axis::Z),
            "A" => Some(Axis::A),
            "E" => None,
            _ => continue,
        };
        let value: f64 = value
            .parse()
            .ok()
            .filter(|v: &f64| v.is_finite())
            .ok_or_else(|| ProtocolError::MalformedPosition {
                line: line.to_string(),
                token: token.to_string(),
            })?;
        match axis {
            Some(axis) => update.set(axis, value),
            None => extruder = Some(value),
        }
    }

    if update.a.is_none() {
        update.a = extruder;
    }

    if update.is_empty() {
        return Err(ProtocolError::NoAxes {
            line: line.to_string(),
        });
    }
    Ok(update)
}

/// Decode SD print progress from an `M27` answer
/// ("SD printing byte 1234/5678"). Returns a fraction in [0, 1].
pub fn parse_sd_progress(line: &str) -> Option<f64> {
    let rest = &line[line.find("byte")? + "byte".len()..];
    let (done, total) = rest.trim().split_once('/')?;
    let done: f64 = done.trim().parse().ok()?;
    let total: f64 = total.split_whitespace().next()?.parse().ok()?;
    if total <= 0.0 {
        return None;
    }
    Some((done / total).clamp(0.0, 1.0))
}
