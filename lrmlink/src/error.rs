//! Error types for lrmlink.

use std::io;
use thiserror::Error;

/// Result type for lrmlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for lrmlink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// Transport-level failure (open, write, or read on the byte channel).
    #[error("Transport error: {0}")]
    Transport(String),

    /// No correlated response arrived within the deadline.
    #[error("Timeout waiting for response to {command}")]
    Timeout {
        /// The exchange that timed out.
        command: &'static str,
    },

    /// An exchange was requested while another one is still outstanding.
    #[error("Session busy: an exchange is already outstanding")]
    SessionBusy,

    /// Wrong or absent device identity during connect.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Binary record or optical payload failed to decode.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The link session has been torn down.
    #[error("Link session disconnected")]
    Disconnected,

    /// No suitable device or port was found.
    #[error("Device not found")]
    DeviceNotFound,
}
