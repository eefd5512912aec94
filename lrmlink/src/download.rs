//! Measurement download orchestrator.
//!
//! Retrieval is a strictly sequential three-level walk over the session:
//! the stored-measurement count, then per measurement its packet count,
//! then every packet's payload. Packet payloads are concatenated in order
//! and decoded into [`MeasurementPoint`]s only once the walk finishes, so
//! a failure anywhere emits nothing.

use crate::error::{Error, Result};
use crate::measurement::{MeasurementPoint, decode_records};
use crate::protocol::{
    Command, ResultRequest, measurement_count_request, packet_count_request, packet_data_request,
};
use crate::session::{DEFAULT_EXCHANGE_TIMEOUT, LinkSession};
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info};
use std::time::Duration;

/// Pause between consecutive packet-data requests. The meter needs this to
/// refill its transmit buffer.
pub const INTER_PACKET_DELAY: Duration = Duration::from_millis(50);

/// Download progress snapshot, reported after each completed measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Measurements fully retrieved so far.
    pub current: u16,
    /// Total measurements stored on the device.
    pub total: u16,
}

/// Retrieve every stored measurement from the connected meter.
///
/// `progress` is invoked once when the count is known (`current == 0`) and
/// again after each measurement's packets have all arrived. Any failed
/// exchange aborts the whole download; the error names the failing request.
pub async fn download_measurements<F>(
    session: &LinkSession,
    mut progress: F,
) -> Result<Vec<MeasurementPoint>>
where
    F: FnMut(DownloadProgress),
{
    let count = measurement_count(session).await?;
    info!("Device reports {count} stored measurements");
    progress(DownloadProgress { current: 0, total: count });

    let mut raw = Vec::new();
    for index in 1..=count {
        let packets = packet_count(session, index).await?;
        debug!("Measurement {index}: {packets} packets");

        for packet in 1..=packets {
            let data = session
                .send_and_wait(
                    Command::ResultGet,
                    &packet_data_request(index, packet),
                    ResultRequest::PacketData.name(),
                    DEFAULT_EXCHANGE_TIMEOUT,
                )
                .await?;
            raw.extend_from_slice(&data);

            tokio::time::sleep(INTER_PACKET_DELAY).await;
        }

        progress(DownloadProgress { current: index, total: count });
    }

    let points = decode_records(&raw)?;
    info!("Decoded {} measurement points", points.len());
    Ok(points)
}

async fn measurement_count(session: &LinkSession) -> Result<u16> {
    let payload = session
        .send_and_wait(
            Command::ResultGet,
            &measurement_count_request(),
            ResultRequest::MeasurementCount.name(),
            DEFAULT_EXCHANGE_TIMEOUT,
        )
        .await?;

    if payload.len() < 2 {
        return Err(Error::Decode(format!(
            "measurement count response too short: {} bytes",
            payload.len()
        )));
    }
    Ok(LittleEndian::read_u16(&payload[..2]))
}

async fn packet_count(session: &LinkSession, index: u16) -> Result<u8> {
    let payload = session
        .send_and_wait(
            Command::ResultGet,
            &packet_count_request(index),
            ResultRequest::PacketCount.name(),
            DEFAULT_EXCHANGE_TIMEOUT,
        )
        .await?;

    payload.first().copied().ok_or_else(|| {
        Error::Decode(format!("empty packet count response for measurement {index}"))
    })
}
