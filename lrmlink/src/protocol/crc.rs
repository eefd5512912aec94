//! CRC-16 checksum used by the LRM frame format.
//!
//! Polynomial 0xA001 (reflected 0x8005), register initialized to 0xFFFF,
//! final register XORed with 0xFFFF. The device computes this over
//! command + length + payload; the checksum field itself is excluded.

/// Compute the frame checksum over the given bytes.
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }

    crc ^ 0xFFFF
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_empty() {
        // Init 0xFFFF, no bytes, final XOR 0xFFFF.
        assert_eq!(crc16(&[]), 0x0000);
    }

    #[test]
    fn test_crc16_single_zero_byte() {
        // One 0x00 byte: the register shifts down to 0x40BF, then the
        // final XOR inverts it.
        assert_eq!(crc16(&[0x00]), 0xBF40);
    }

    #[test]
    fn test_crc16_check_string() {
        // "123456789" under init=0xFFFF, poly=0xA001, xorout=0xFFFF
        // (the CRC-16/USB parameter set) checks to 0xB4C8.
        assert_eq!(crc16(b"123456789"), 0xB4C8);
    }

    #[test]
    fn test_crc16_sensitivity() {
        let a = crc16(&[0x01, 0x02, 0x03]);
        let b = crc16(&[0x01, 0x02, 0x02]);
        assert_ne!(a, b);
    }
}
