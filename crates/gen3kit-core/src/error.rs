//! Error handling for gen3kit
//!
//! Provides error types for the two layers of the driver:
//! - Connection errors (port discovery, open, raw I/O)
//! - Protocol errors (framing, checksums, timeouts, device replies)
//!
//! All error types use `thiserror` for ergonomic error handling.

use crate::version::Version;
use thiserror::Error;

/// Connection error type
///
/// Represents errors raised while locating, opening, or talking to the
/// OS serial device.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// The named port does not exist on this system
    #[error("Serial port not found: {port}")]
    PortNotFound {
        /// The name of the port that was not found.
        port: String,
    },

    /// Another process holds the port
    #[error("Serial port already in use: {port}")]
    PortInUse {
        /// The name of the port that is in use.
        port: String,
    },

    /// The port exists but could not be opened or configured
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// The protocol requires 8 data bits
    #[error("Unsupported data bits: {bits} (controller requires 8)")]
    UnsupportedDataBits {
        /// The configured data bit count.
        bits: u8,
    },

    /// Port enumeration failed
    #[error("Failed to enumerate serial ports: {reason}")]
    EnumerationFailed {
        /// The reason enumeration failed.
        reason: String,
    },

    /// Read or write on the open device failed
    #[error("Serial I/O error: {reason}")]
    Io {
        /// The reason for the I/O failure.
        reason: String,
    },
}

/// Protocol error type
///
/// Represents faults in the framed request/response exchange with the
/// controller board.
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    /// No byte arrived inside the configured read timeout
    #[error("Timed out after {timeout_ms}ms waiting for a reply")]
    Timeout {
        /// The read timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// A received frame failed its checksum
    #[error("CRC mismatch: expected {expected:#04x}, got {actual:#04x}")]
    CrcMismatch {
        /// The checksum computed over the received payload.
        expected: u8,
        /// The checksum byte that arrived on the wire.
        actual: u8,
    },

    /// An outgoing payload does not fit in a single frame
    #[error("Payload of {len} bytes exceeds the 255 byte frame limit")]
    PayloadTooLarge {
        /// The oversized payload length.
        len: usize,
    },

    /// A reply carried fewer data bytes than the caller tried to read
    #[error("Response too short: wanted {wanted} more bytes, {available} available")]
    ResponseTooShort {
        /// How many bytes the read needed.
        wanted: usize,
        /// How many unread bytes the reply still held.
        available: usize,
    },

    /// The device does not implement the command
    #[error("Command not supported by firmware: {command}")]
    Unsupported {
        /// The command the device rejected.
        command: String,
    },

    /// The device replied with an error or unknown response code
    #[error("Device reported error code {code:#04x}")]
    Device {
        /// The raw response code byte.
        code: u8,
    },
}

/// Main error type for gen3kit
///
/// A unified error type that can represent any failure in the driver.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The controller reported a firmware older than the driver supports
    #[error("Firmware version {reported} is older than the required {minimum}")]
    BadFirmwareVersion {
        /// The version the controller reported.
        reported: Version,
        /// The oldest version the driver accepts.
        minimum: Version,
    },

    /// A command was issued before the session reached `Ready`
    #[error("Driver not ready for commands (session is {state})")]
    NotReady {
        /// The session state at the time of the call.
        state: String,
    },

    /// The operation was cancelled from another thread
    #[error("Operation interrupted")]
    Interrupted,

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

    /// Check if this is a read timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Protocol(ProtocolError::Timeout { .. }))
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
