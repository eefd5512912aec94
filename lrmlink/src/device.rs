//! Device identity parsing and model resolution.
//!
//! The identity block is the payload of the device's `IdentityGet` response.
//! Layout (little-endian, at least 14 bytes):
//!
//! ```text
//! offset 0   family        u16
//! offset 2   device type   u16
//! offset 4   serial number u32
//! offset 8   hw version    3 x u8
//! offset 11  fw version    3 x u8
//! ```

use crate::error::{Error, Result};
use std::fmt;

/// Sentinel model string for (family, type) pairs outside the table.
pub const UNKNOWN_MODEL: &str = "unknown";

/// The single model accepted as a link partner.
pub const ACCEPTED_MODEL: &str = "LRM-02";

/// Known (family, type) pairs for the LRM product line.
const KNOWN_MODELS: &[(u16, u16, &str)] = &[
    (0x0001, 0x0001, "LRM-01"),
    (0x0001, 0x0002, "LRM-02"),
    (0x0001, 0x0003, "LRM-03"),
];

/// Three-component firmware/hardware version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version(pub u8, pub u8, pub u8);

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0, self.1, self.2)
    }
}

/// Identity of a connected meter, parsed once per successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Device family code.
    pub family: u16,
    /// Device type code within the family.
    pub device_type: u16,
    /// Factory serial number.
    pub serial_number: u32,
    /// Hardware revision.
    pub hw_version: Version,
    /// Firmware revision.
    pub fw_version: Version,
    /// Model designation resolved from (family, type).
    pub model: &'static str,
}

impl DeviceIdentity {
    /// Minimum identity payload length.
    pub const MIN_LEN: usize = 14;

    /// Parse an identity block from a frame payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < Self::MIN_LEN {
            return Err(Error::Decode(format!(
                "identity payload too short: {} bytes, need {}",
                payload.len(),
                Self::MIN_LEN
            )));
        }

        let family = u16::from_le_bytes([payload[0], payload[1]]);
        let device_type = u16::from_le_bytes([payload[2], payload[3]]);
        let serial_number = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
        let hw_version = Version(payload[8], payload[9], payload[10]);
        let fw_version = Version(payload[11], payload[12], payload[13]);

        Ok(Self {
            family,
            device_type,
            serial_number,
            hw_version,
            fw_version,
            model: resolve_model(family, device_type),
        })
    }

    /// Whether this device is an accepted link partner.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.model == ACCEPTED_MODEL
    }
}

/// Resolve a (family, type) pair against the static model table.
#[must_use]
pub fn resolve_model(family: u16, device_type: u16) -> &'static str {
    KNOWN_MODELS
        .iter()
        .find(|(f, t, _)| *f == family && *t == device_type)
        .map_or(UNKNOWN_MODEL, |(_, _, name)| name)
}
