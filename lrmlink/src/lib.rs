//! # lrmlink
//!
//! A library for talking to LRM earth-resistance meters.
//!
//! This crate implements the meter's serial link protocol and everything
//! built on top of it:
//!
//! - CRC-16 framed packet codec
//! - Link session with identity handshake and correlated exchanges
//! - Three-level measurement download
//! - Chunked firmware streaming
//! - Optical (QR) code decoding with multi-part reassembly
//!
//! All device paths converge on [`MeasurementPoint`]: downloaded records and
//! scanned codes both yield the same normalized type, so downstream storage
//! never sees where a point came from.
//!
//! ## Features
//!
//! - `native` (default): serial port support via `tokio-serial`
//!
//! ## Example
//!
//! ```rust,no_run
//! use lrmlink::{LinkSession, SerialTransport, download_measurements};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = SerialTransport::new("/dev/ttyUSB0");
//!     let session = LinkSession::connect(transport).await?;
//!     println!("Connected to {}", session.identity().model);
//!
//!     let points = download_measurements(&session, |p| {
//!         println!("Downloaded {}/{}", p.current, p.total);
//!     })
//!     .await?;
//!     println!("{} measurement points", points.len());
//!
//!     session.disconnect().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod download;
pub mod error;
pub mod firmware;
pub mod measurement;
pub mod optical;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use transport::SerialTransport;
#[cfg(feature = "native")]
pub use transport::detect::{DetectedPort, UsbBridge, auto_detect_port, detect_ports};
pub use {
    device::{ACCEPTED_MODEL, DeviceIdentity, Version},
    download::{DownloadProgress, download_measurements},
    error::{Error, Result},
    firmware::{FirmwareConfig, transfer_firmware},
    measurement::{MeasurementPoint, MeasurementSink, decode_records},
    optical::{OpticalDecoder, ScanOutcome},
    protocol::{Command, ResultRequest},
    session::{LinkSession, LinkState},
    transport::Transport,
};
