//! Wire format for the nowcast protocol.
//!
//! Every frame carries, little-endian:
//! - an optional 1-byte wire version (absent in the legacy layout)
//! - a 2-byte sequence number
//! - a 2-byte CRC-16 over the whole frame, computed with this field zeroed
//! - a 1-byte payload type tag
//! - the payload bytes, whose length is implied by the frame length
//!
//! Decoding is a pure function of the received bytes.

pub mod codec;
pub mod error;
pub mod payload;

pub use codec::{
    decode_frame, encode_frame, frame_checksum, Frame, FrameConfig, FrameHeader, WireVersion,
    DEFAULT_MAX_FRAME_SIZE, FRAME_VERSION,
};
pub use error::{FrameError, Result};
pub use payload::{
    decode_payload, encode_payload, expected_length, ExpectedLength, Payload, PayloadType,
};
