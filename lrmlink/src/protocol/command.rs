//! LRM command catalog.
//!
//! The meter speaks a small fixed command set. Result retrieval is a single
//! command (`ResultGet`) whose first payload byte selects the sub-operation.

use byteorder::{LittleEndian, WriteBytesExt};

/// Top-level command identifiers (frame command field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Request the device identity block (0x00).
    IdentityGet = 0x00,

    /// Measurement result retrieval (0x02); sub-command in the payload.
    ResultGet = 0x02,
}

impl Command {
    /// Map a wire byte back to a catalog entry.
    ///
    /// Returns `None` for command bytes outside the catalog; the session
    /// drops such frames with a diagnostic.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::IdentityGet),
            0x02 => Some(Self::ResultGet),
            _ => None,
        }
    }

    /// Human-readable name for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Self::IdentityGet => "IdentityGet",
            Self::ResultGet => "ResultGet",
        }
    }
}

/// Sub-commands of [`Command::ResultGet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResultRequest {
    /// Number of stored measurements (0x00).
    MeasurementCount = 0x00,

    /// Number of data packets for one measurement (0x01).
    PacketCount = 0x01,

    /// One data packet of one measurement (0x02).
    PacketData = 0x02,
}

impl ResultRequest {
    /// Human-readable name for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Self::MeasurementCount => "GetMeasurementCount",
            Self::PacketCount => "GetPacketCount",
            Self::PacketData => "GetPacketData",
        }
    }
}

/// Build the request payload for the measurement-count query.
#[must_use]
pub fn measurement_count_request() -> Vec<u8> {
    vec![ResultRequest::MeasurementCount as u8]
}

/// Build the request payload for the packet-count query.
///
/// `index` is 1-based, matching the device's measurement numbering.
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
#[must_use]
pub fn packet_count_request(index: u16) -> Vec<u8> {
    let mut payload = vec![ResultRequest::PacketCount as u8];
    payload.write_u16::<LittleEndian>(index).unwrap();
    payload
}

/// Build the request payload for one packet of one measurement.
///
/// Both `index` and `packet` are 1-based.
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
#[must_use]
pub fn packet_data_request(index: u16, packet: u8) -> Vec<u8> {
    let mut payload = vec![ResultRequest::PacketData as u8];
    payload.write_u16::<LittleEndian>(index).unwrap();
    payload.push(packet);
    payload
}
