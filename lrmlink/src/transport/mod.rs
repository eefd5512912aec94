//! Transport abstraction for the byte channel to the meter.
//!
//! The protocol layer is transport-agnostic: it sees a duplex raw-byte
//! channel and nothing else. No framing knowledge crosses this boundary.
//!
//! ```text
//! +---------------------+
//! |  Session / Protocol |
//! +----------+----------+
//!            |
//!            v
//! +----------+----------+
//! |   Transport trait   |
//! +----------+----------+
//!            |
//!            v
//! +----------+----------+
//! |  SerialTransport    |
//! |   (tokio-serial)    |
//! +---------------------+
//! ```

#[cfg(feature = "native")]
pub mod detect;

#[cfg(feature = "native")]
pub mod serial;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Duplex byte channel to a device.
///
/// Implementations move raw bytes only; reads complete with whatever chunk
/// the channel delivered, in arrival order. All operations suspend the
/// caller rather than blocking the thread.
#[async_trait]
pub trait Transport: Send {
    /// Open the underlying channel.
    async fn open(&mut self) -> Result<()>;

    /// Close the channel and release resources.
    async fn close(&mut self) -> Result<()>;

    /// Write raw bytes to the channel.
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Wait for the next chunk of inbound bytes.
    ///
    /// `Ok(None)` means the channel produced nothing within its internal
    /// polling window; the caller just waits again.
    async fn read_chunk(&mut self) -> Result<Option<Bytes>>;

    /// Channel name for logging (port path, test label, ...).
    fn name(&self) -> &str;
}

// Re-export the native implementation
#[cfg(feature = "native")]
pub use serial::SerialTransport;
