/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    /// The buffer is shorter than a frame header.
    #[error("frame too short ({len} bytes, header is {min})")]
    TooShort { len: usize, min: usize },

    /// The payload region is shorter than its type requires.
    #[error("payload type {payload_type} needs at least {min} bytes, got {len}")]
    TooShortForPayload {
        payload_type: u8,
        len: usize,
        min: usize,
    },

    /// The stored checksum does not match the recomputed one.
    #[error("checksum mismatch (computed {computed:#06x}, stored {stored:#06x})")]
    ChecksumMismatch { computed: u16, stored: u16 },

    /// The payload length violates its type's length rule.
    #[error("payload type {payload_type} expects {expected}, got {len} bytes")]
    PayloadSizeMismatch {
        payload_type: u8,
        len: usize,
        expected: String,
    },

    /// The payload type tag is not part of the protocol.
    #[error("unknown payload type {0:#04x}")]
    UnknownPayloadType(u8),

    /// The frame was produced by an incompatible wire version.
    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u8),

    /// A pattern name is not valid UTF-8.
    #[error("pattern name is not valid UTF-8")]
    InvalidPatternName,

    /// The payload does not fit into one frame.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
