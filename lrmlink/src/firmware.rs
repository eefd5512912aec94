//! Firmware image transfer.
//!
//! The meter's bootloader consumes the image as a raw byte stream with no
//! acknowledgement protocol: the image is cut into fixed-size chunks written
//! through the session unframed, with a short pause between chunks so the
//! device can commit each one to flash.

use crate::error::Result;
use crate::session::LinkSession;
use log::{debug, info};
use std::time::Duration;

/// Chunking parameters for a firmware transfer.
#[derive(Debug, Clone)]
pub struct FirmwareConfig {
    /// Bytes per chunk.
    pub chunk_size: usize,
    /// Pause after each chunk.
    pub inter_chunk_delay: Duration,
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            inter_chunk_delay: Duration::from_millis(50),
        }
    }
}

/// Stream a firmware image to the device.
///
/// `progress` receives cumulative bytes sent and the image total after each
/// chunk. A failed write aborts the transfer with the transport error; bytes
/// already sent are not rolled back.
pub async fn transfer_firmware<F>(
    session: &LinkSession,
    image: &[u8],
    config: &FirmwareConfig,
    mut progress: F,
) -> Result<()>
where
    F: FnMut(usize, usize),
{
    let total = image.len();
    info!(
        "Starting firmware transfer: {total} bytes in {}-byte chunks",
        config.chunk_size
    );

    let mut sent = 0;
    for chunk in image.chunks(config.chunk_size) {
        session.write_raw(chunk.to_vec()).await?;
        sent += chunk.len();
        debug!("Firmware chunk sent: {sent}/{total} bytes");
        progress(sent, total);

        tokio::time::sleep(config.inter_chunk_delay).await;
    }

    info!("Firmware transfer complete ({total} bytes)");
    Ok(())
}
