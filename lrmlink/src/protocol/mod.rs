//! Wire protocol: frame codec, checksum, command catalog.

pub mod command;
pub mod crc;
pub mod frame;

// Re-export common types
pub use command::{
    Command, ResultRequest, measurement_count_request, packet_count_request, packet_data_request,
};
pub use frame::{DecodedFrame, FRAME_OVERHEAD, decode_one, encode};
