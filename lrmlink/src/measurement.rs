//! Measurement records and the binary record codec.
//!
//! [`MeasurementPoint`] is the shared output type of the two retrieval
//! channels: the framed download protocol ([`crate::download`]) and the
//! optical-code path ([`crate::optical`]). Values are always normalized to
//! base units (ohms, amps) regardless of the scale markers the source
//! encoding used, so downstream persistence never sees channel-specific
//! state.

use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Size of one binary measurement record on the wire.
pub const RECORD_SIZE: usize = 16;

/// One decoded resistance/current measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementPoint {
    /// Measurement group (earthing system / circuit).
    pub group: u32,
    /// Point number within the group.
    pub point: u32,
    /// Resistance in ohms.
    pub resistance: f64,
    /// Test current in amps.
    pub current: f64,
    /// When the measurement was taken, if the source carried it.
    pub timestamp: Option<NaiveDateTime>,
}

/// Downstream consumer boundary for retrieved measurements.
///
/// The subsystem hands decoded points across this seam together with the
/// identifier of the user/session they belong to; how and where they are
/// stored is none of its business.
pub trait MeasurementSink {
    /// Persist a batch of measurement points for `user`.
    fn store(&mut self, user: &str, points: Vec<MeasurementPoint>) -> Result<()>;
}

/// Decode a blob of consecutive 16-byte records.
///
/// Record layout (little-endian):
///
/// ```text
/// offset 0   group       u8
/// offset 1   point       u8
/// offset 2   resistance  f32 (ohms)
/// offset 6   current     f32 (amps)
/// offset 10  hour, minute, second   u8 each
/// offset 13  day, month             u8 each
/// offset 15  year - 2000            u8
/// ```
///
/// A blob whose length is not a multiple of 16 is rejected whole; no
/// partial records are emitted.
pub fn decode_records(data: &[u8]) -> Result<Vec<MeasurementPoint>> {
    if data.len() % RECORD_SIZE != 0 {
        return Err(Error::Decode(format!(
            "measurement blob length {} is not a multiple of {RECORD_SIZE}",
            data.len()
        )));
    }

    let mut points = Vec::with_capacity(data.len() / RECORD_SIZE);

    for (i, record) in data.chunks_exact(RECORD_SIZE).enumerate() {
        points.push(decode_record(record).map_err(|e| {
            Error::Decode(format!("record {i}: {e}"))
        })?);
    }

    Ok(points)
}

#[allow(clippy::unwrap_used)] // Cursor reads over a length-checked slice cannot fail
fn decode_record(record: &[u8]) -> Result<MeasurementPoint> {
    debug_assert_eq!(record.len(), RECORD_SIZE);

    let mut cursor = Cursor::new(record);
    let group = u32::from(cursor.read_u8().unwrap());
    let point = u32::from(cursor.read_u8().unwrap());
    let resistance = f64::from(cursor.read_f32::<LittleEndian>().unwrap());
    let current = f64::from(cursor.read_f32::<LittleEndian>().unwrap());
    let hour = cursor.read_u8().unwrap();
    let minute = cursor.read_u8().unwrap();
    let second = cursor.read_u8().unwrap();
    let day = cursor.read_u8().unwrap();
    let month = cursor.read_u8().unwrap();
    let year = 2000 + i32::from(cursor.read_u8().unwrap());

    let timestamp = NaiveDate::from_ymd_opt(year, u32::from(month), u32::from(day))
        .and_then(|d| d.and_hms_opt(u32::from(hour), u32::from(minute), u32::from(second)))
        .ok_or_else(|| {
            Error::Decode(format!(
                "invalid timestamp {year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
            ))
        })?;

    Ok(MeasurementPoint {
        group,
        point,
        resistance,
        current,
        timestamp: Some(timestamp),
    })
}
