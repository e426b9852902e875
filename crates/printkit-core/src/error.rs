//! Error handling for printkit
//!
//! Errors are grouped by the layer that raises them:
//! - Connection errors (link open/read/write, port enumeration)
//! - Protocol errors (checksum/resend, binary packet faults, printer-reported errors)
//! - Job errors (print lifecycle misuse)
//! - Controller errors (façade misuse)
//! - Configuration errors (profile loading and validation)
//!
//! All error types use `thiserror`.

use thiserror::Error;

/// Connection error type
///
/// Link-level failures. These move a connection to `Error` or
/// `ClosedWithError` and are not retried beyond the connect-time budget.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// Port is not in the enumerated device list
    #[error("Port not found: {port}")]
    PortNotFound {
        /// The name of the port that was not found.
        port: String,
    },

    /// No candidate device answered during autodetection
    #[error("No printer detected on any candidate port")]
    NoDeviceDetected,

    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Connection timeout
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Connection lost
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// Baud rate not supported
    #[error("Baud rate {baud} not supported")]
    UnsupportedBaudRate {
        /// The unsupported baud rate.
        baud: u32,
    },

    /// Every baud rate candidate was tried without a stable answer
    #[error("Baud rate detection failed after {attempted} candidates")]
    BaudDetectionFailed {
        /// Number of candidates tried.
        attempted: usize,
    },

    /// Serial port error
    #[error("Serial port error: {reason}")]
    SerialError {
        /// The reason for the serial port error.
        reason: String,
    },

    /// Link is not open
    #[error("Link is closed")]
    Closed,
}

/// Protocol error type
///
/// Faults in either wire protocol. Transmission and flow-control errors are
/// recovered locally; printer-reported errors are fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// The printer asked for a line that is no longer in the history
    #[error("Resend of line {requested} impossible (current line {current}, history holds {history})")]
    ResendOutOfRange {
        /// Requested line number.
        requested: u32,
        /// Next line number the host would have sent.
        current: u32,
        /// Number of retained lines.
        history: usize,
    },

    /// Error line reported by the firmware
    #[error("Printer error: {message}")]
    PrinterError {
        /// Text following `Error:`.
        message: String,
    },

    /// Packet transmission failed (CRC mismatch, generic packet error, timeout)
    #[error("Transmission error: {reason}")]
    Transmission {
        /// Description of the failure.
        reason: String,
    },

    /// Retry budget for transmission errors used up
    #[error("Transmission failed after {attempts} attempts: {reason}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Last failure seen.
        reason: String,
    },

    /// The printer answered with a response code the host does not know
    #[error("Unknown response code 0x{code:02X}")]
    UnknownResponse {
        /// Raw response code.
        code: u8,
    },

    /// Printer command buffer full
    #[error("Printer buffer overflow")]
    BufferOverflow,

    /// Printer reports that the running build was cancelled
    #[error("Build cancelled by printer")]
    CancelBuild,

    /// Printer refused a command
    #[error("Command 0x{opcode:02X} rejected: {reason}")]
    CommandRejected {
        /// Opcode that was rejected.
        opcode: u8,
        /// Reason derived from the response code.
        reason: String,
    },

    /// Opcode not present in the command table
    #[error("Unknown opcode 0x{opcode:02X}")]
    UnknownOpcode {
        /// The offending opcode.
        opcode: u8,
    },

    /// Packet or payload could not be decoded
    #[error("Malformed packet: {reason}")]
    MalformedPacket {
        /// What was wrong.
        reason: String,
    },
}

impl ProtocolError {
    /// Errors worth retrying with the same bytes
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProtocolError::Transmission { .. }
                | ProtocolError::UnknownResponse { .. }
                | ProtocolError::BufferOverflow
        )
    }
}

/// Print job error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    /// `start_print` without a selected file
    #[error("No file selected")]
    NoFileSelected,

    /// A job is already running or paused
    #[error("A print job is already active")]
    AlreadyRunning,

    /// Operation needs an active job
    #[error("No active print job")]
    NotRunning,

    /// Lifecycle transition not allowed
    #[error("Invalid job transition from {from} to {to}")]
    InvalidTransition {
        /// Current job state.
        from: String,
        /// Requested job state.
        to: String,
    },

    /// Job file could not be read
    #[error("File error for {path}: {reason}")]
    FileError {
        /// Path of the job file.
        path: String,
        /// The reason for the file error.
        reason: String,
    },
}

/// Controller error type
///
/// Programmer errors raised synchronously by the façade.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    /// Controller is not connected
    #[error("Printer not connected")]
    NotConnected,

    /// Printer is connected but not operational
    #[error("Printer not operational (state {state})")]
    NotOperational {
        /// The current state name.
        state: String,
    },

    /// Command was rejected before reaching an engine
    #[error("Command rejected: {reason}")]
    CommandRejected {
        /// The reason the command was rejected.
        reason: String,
    },

    /// Engine thread has gone away
    #[error("Engine stopped")]
    EngineStopped,
}

/// Configuration error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// File could not be parsed
    #[error("Failed to parse configuration: {reason}")]
    Parse {
        /// Parser message.
        reason: String,
    },

    /// A value failed validation
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// Offending field.
        field: String,
        /// The reason the value is invalid.
        reason: String,
    },
}

/// Main error type for printkit
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Job error
    #[error(transparent)]
    Job(#[from] JobError),

    /// Controller error
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Connection(ConnectionError::ConnectionTimeout { .. }) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }

    /// Check if this is a link-level error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Io(_))
    }

    /// Check if retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Protocol(p) => p.is_transient(),
            _ => false,
        }
    }

    /// Check if this is the printer reporting a cancelled build
    pub fn is_cancel_build(&self) -> bool {
        matches!(self, Error::Protocol(ProtocolError::CancelBuild))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::from(ProtocolError::BufferOverflow).is_transient());
        assert!(Error::from(ProtocolError::Transmission {
            reason: "crc".into()
        })
        .is_transient());
        assert!(!Error::from(ProtocolError::CancelBuild).is_transient());
        assert!(!Error::from(ConnectionError::Closed).is_transient());
    }

    #[test]
    fn test_display_messages() {
        let err = Error::from(ProtocolError::ResendOutOfRange {
            requested: 3,
            current: 250,
            history: 100,
        });
        assert_eq!(
            err.to_string(),
            "Resend of line 3 impossible (current line 250, history holds 100)"
        );
        assert!(Error::from(ProtocolError::CancelBuild).is_cancel_build());
    }
}
