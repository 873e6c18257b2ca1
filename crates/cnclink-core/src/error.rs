//! Error handling for CncLink
//!
//! Provides error types for each layer of the control core:
//! - Connection errors (endpoint discovery and probing)
//! - Transport errors (line I/O on an open channel)
//! - Protocol errors (malformed firmware lines)
//! - Job errors (failures while streaming a program)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Connection error type
///
/// Raised while looking for a responsive firmware endpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// No candidate endpoint answered with the firmware signature
    #[error("No controller found (tried {tried} endpoint(s))")]
    NotFound {
        /// Number of endpoints that were probed.
        tried: usize,
    },

    /// The endpoint could not be opened
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// The identification probe got no answer in time
    #[error("No answer from {port} within {timeout_ms}ms")]
    ProbeTimeout {
        /// The probed port.
        port: String,
        /// The probe timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The endpoint answered but without the expected firmware signature
    #[error("Unexpected firmware on {port}")]
    SignatureMismatch {
        /// The probed port.
        port: String,
    },

    /// Candidate endpoints could not be enumerated
    #[error("Failed to enumerate ports: {reason}")]
    Enumeration {
        /// The reason enumeration failed.
        reason: String,
    },
}

/// Transport error type
///
/// Represents failures of line I/O on an already open channel.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The channel has been closed
    #[error("Transport disconnected")]
    Disconnected,

    /// A command could not be written
    #[error("Failed to write '{command}': {reason}")]
    WriteFailed {
        /// The command that was being written.
        command: String,
        /// The reason the write failed.
        reason: String,
    },
}

impl TransportError {
    /// Whether a retry after a short pause may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::InvalidData
            ),
            TransportError::Disconnected => false,
            TransportError::WriteFailed { .. } => false,
        }
    }
}

/// Protocol error type
///
/// Raised when a firmware line looks like a report but cannot be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// An axis token carried a value that is not a number
    #[error("Malformed position token '{token}' in '{line}'")]
    MalformedPosition {
        /// The full line.
        line: String,
        /// The offending token.
        token: String,
    },

    /// A position line contained no recognised axis
    #[error("No axis values in '{line}'")]
    NoAxes {
        /// The full line.
        line: String,
    },
}

/// Job execution error type
#[derive(Error, Debug)]
pub enum JobError {
    /// Writing to the firmware failed mid-job
    #[error("Transport failure while streaming: {0}")]
    Transport(#[from] TransportError),

    /// The connection went away before or during the job
    #[error("Controller not connected")]
    NotConnected,
}

/// Main error type for CncLink
///
/// A unified error type that can represent any error from all layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Transport error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Job error
    #[error(transparent)]
    Job(#[from] JobError),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if a retry may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transport(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::NotFound { tried: 3 };
        assert_eq!(err.to_string(), "No controller found (tried 3 endpoint(s))");

        let err = ConnectionError::ProbeTimeout {
            port: "/dev/ttyACM0".to_string(),
            timeout_ms: 3000,
        };
        assert_eq!(err.to_string(), "No answer from /dev/ttyACM0 within 3000ms");
    }

    #[test]
    fn test_transient_classification() {
        let timed_out = TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "slow",
        ));
        assert!(timed_out.is_transient());
        assert!(!TransportError::Disconnected.is_transient());

        let err: Error = timed_out.into();
        assert!(err.is_transient());
        assert!(!err.is_connection_error());
    }

    #[test]
    fn test_error_conversion() {
        let err: Error = ConnectionError::NotFound { tried: 0 }.into();
        assert!(err.is_connection_error());

        let err: Error = JobError::NotConnected.into();
        assert!(matches!(err, Error::Job(JobError::NotConnected)));
    }
}
