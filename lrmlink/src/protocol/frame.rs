//! LRM frame codec.
//!
//! ## Frame format
//!
//! ```text
//! +---------+----------+---------------+----------+
//! | Command |  Length  |    Payload    |  CRC16   |
//! +---------+----------+---------------+----------+
//! | 1 byte  | 2 bytes  | Length bytes  | 2 bytes  |
//! +---------+----------+---------------+----------+
//! |   cmd   |  LE, payload only        |   LE     |
//! +---------+--------------------------+----------+
//! ```
//!
//! The checksum covers command + length + payload. Frames are transient:
//! encoded right before a write, or sliced out of the reassembly buffer and
//! dropped after dispatch.

use crate::protocol::crc::crc16;
use byteorder::{LittleEndian, WriteBytesExt};
use bytes::Bytes;

/// Frame overhead: command (1) + length (2) + checksum (2).
pub const FRAME_OVERHEAD: usize = 5;

/// Encode a frame for the given command byte and payload.
///
/// The payload must fit the 16-bit length field; callers own that bound.
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
#[must_use]
pub fn encode(command: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FRAME_OVERHEAD + payload.len());

    buf.push(command);
    // Length counts payload bytes only - safe cast, bounded by the caller
    buf.write_u16::<LittleEndian>(payload.len() as u16).unwrap();
    buf.extend_from_slice(payload);

    let crc = crc16(&buf);
    buf.write_u16::<LittleEndian>(crc).unwrap();

    buf
}

/// One frame extracted from the reassembly buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Raw command byte (may be outside the catalog).
    pub command: u8,
    /// Frame payload.
    pub payload: Bytes,
    /// Checksum carried on the wire.
    pub checksum: u16,
    /// Checksum recomputed over command + length + payload.
    pub computed: u16,
}

impl DecodedFrame {
    /// Whether the transmitted checksum matches the recomputed one.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.checksum == self.computed
    }
}

/// Try to extract one frame from the front of `buf`.
///
/// Returns `None` while the buffer holds less than a complete frame (the
/// caller waits for more transport data, never blocks or speculates).
/// Once `5 + length` bytes are available the frame is always consumed,
/// even when its checksum turns out to be wrong; skipping consumption on a
/// corrupt frame would wedge the stream on that frame forever. Validity is
/// reported separately via [`DecodedFrame::is_valid`].
#[must_use]
pub fn decode_one(buf: &[u8]) -> Option<(DecodedFrame, usize)> {
    if buf.len() < FRAME_OVERHEAD {
        return None;
    }

    let length = usize::from(u16::from_le_bytes([buf[1], buf[2]]));
    let total = FRAME_OVERHEAD + length;
    if buf.len() < total {
        return None;
    }

    let checksum = u16::from_le_bytes([buf[total - 2], buf[total - 1]]);
    let computed = crc16(&buf[..total - 2]);

    let frame = DecodedFrame {
        command: buf[0],
        payload: Bytes::copy_from_slice(&buf[3..total - 2]),
        checksum,
        computed,
    };

    Some((frame, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let encoded = encode(0x02, &[0xAA, 0xBB]);
        assert_eq!(encoded.len(), 7);
        assert_eq!(encoded[0], 0x02);
        // Length field, little-endian
        assert_eq!(&encoded[1..3], &[0x02, 0x00]);
        assert_eq!(&encoded[3..5], &[0xAA, 0xBB]);
        // Trailing checksum over the first 5 bytes
        let crc = crc16(&encoded[..5]);
        assert_eq!(encoded[5], (crc & 0xFF) as u8);
        assert_eq!(encoded[6], (crc >> 8) as u8);
    }

    #[test]
    fn test_round_trip() {
        let payload = b"resistance record".to_vec();
        let encoded = encode(0x02, &payload);

        let (frame, consumed) = decode_one(&encoded).expect("complete frame");
        assert_eq!(consumed, encoded.len());
        assert_eq!(frame.command, 0x02);
        assert_eq!(frame.payload.as_ref(), payload.as_slice());
        assert!(frame.is_valid());
    }

    #[test]
    fn test_round_trip_empty_payload() {
        let encoded = encode(0x00, &[]);
        assert_eq!(encoded.len(), FRAME_OVERHEAD);

        let (frame, consumed) = decode_one(&encoded).expect("complete frame");
        assert_eq!(consumed, FRAME_OVERHEAD);
        assert_eq!(frame.command, 0x00);
        assert!(frame.payload.is_empty());
        assert!(frame.is_valid());
    }

    #[test]
    fn test_incomplete_returns_none() {
        let encoded = encode(0x02, &[1, 2, 3, 4]);
        for cut in 0..encoded.len() {
            assert!(
                decode_one(&encoded[..cut]).is_none(),
                "truncated to {cut} bytes must be incomplete"
            );
        }
    }

    #[test]
    fn test_single_bit_flip_invalidates() {
        let encoded = encode(0x02, &[0x10, 0x20, 0x30]);
        let bytes_before_length = 1; // flipping the length field changes framing, not validity

        for byte_idx in 0..encoded.len() {
            // The length field redefines where the frame ends; skip it here
            // (it is covered by the desync policy, not checksum validity).
            if (bytes_before_length..3).contains(&byte_idx) {
                continue;
            }
            for bit in 0..8 {
                let mut corrupted = encoded.clone();
                corrupted[byte_idx] ^= 1 << bit;
                let (frame, consumed) = decode_one(&corrupted).expect("still a complete frame");
                assert_eq!(consumed, encoded.len());
                assert!(
                    !frame.is_valid(),
                    "flip at byte {byte_idx} bit {bit} must invalidate the frame"
                );
            }
        }
    }

    #[test]
    fn test_corrupt_frame_still_consumed() {
        let mut encoded = encode(0x02, &[0x55; 8]);
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;

        let (frame, consumed) = decode_one(&encoded).expect("complete frame");
        assert_eq!(consumed, encoded.len());
        assert!(!frame.is_valid());
    }

    #[test]
    fn test_two_frames_back_to_back() {
        let mut stream = encode(0x00, &[]);
        stream.extend_from_slice(&encode(0x02, &[0x01]));

        let (first, consumed) = decode_one(&stream).expect("first frame");
        assert_eq!(first.command, 0x00);
        let (second, rest) = decode_one(&stream[consumed..]).expect("second frame");
        assert_eq!(second.command, 0x02);
        assert_eq!(consumed + rest, stream.len());
    }
}
