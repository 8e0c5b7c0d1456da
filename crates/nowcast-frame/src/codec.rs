use bytes::{BufMut, BytesMut};
use crc::{Crc, CRC_16_IBM_SDLC};

use crate::error::{FrameError, Result};
use crate::payload::PayloadType;

/// Default maximum frame size: the link MTU.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1470;

/// Version byte written by [`WireVersion::V1`].
pub const FRAME_VERSION: u8 = 1;

const CHECKSUM_LEN: usize = 2;

/// CRC-16, reflected poly 0x1021, init 0xFFFF, final xor 0xFFFF.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);

/// Header layout selector.
///
/// The legacy layout has no version field, so a new payload type cannot be
/// told apart from a corrupted frame. `V1` prepends a version byte; the two
/// layouts are not wire compatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum WireVersion {
    /// `seq:2 | crc:2 | type:1`
    Legacy,
    /// `ver:1 | seq:2 | crc:2 | type:1`
    #[default]
    V1,
}

impl WireVersion {
    /// Fixed header size in bytes.
    pub const fn header_size(self) -> usize {
        self.prefix() + 5
    }

    const fn prefix(self) -> usize {
        match self {
            WireVersion::Legacy => 0,
            WireVersion::V1 => 1,
        }
    }

    const fn sequence_offset(self) -> usize {
        self.prefix()
    }

    const fn checksum_offset(self) -> usize {
        self.prefix() + 2
    }

    const fn type_offset(self) -> usize {
        self.prefix() + 4
    }
}

/// Configuration for the frame codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FrameConfig {
    /// Maximum total frame size in bytes. Default: 1470.
    pub max_frame_size: usize,
    /// Header layout. Default: [`WireVersion::V1`].
    pub wire_version: WireVersion,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            wire_version: WireVersion::default(),
        }
    }
}

impl FrameConfig {
    /// Legacy 5-byte header layout.
    pub fn legacy() -> Self {
        Self {
            wire_version: WireVersion::Legacy,
            ..Self::default()
        }
    }

    /// Fixed header size for this configuration.
    pub fn header_size(&self) -> usize {
        self.wire_version.header_size()
    }

    /// Largest payload that still fits into one frame.
    pub fn max_payload_size(&self) -> usize {
        self.max_frame_size.saturating_sub(self.header_size())
    }
}

/// Fixed header fields of a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub sequence: u16,
    pub checksum: u16,
    pub payload_type: u8,
}

/// A decoded frame borrowing its payload from the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub header: FrameHeader,
    pub payload: &'a [u8],
}

impl Frame<'_> {
    pub fn sequence(&self) -> u16 {
        self.header.sequence
    }

    pub fn payload_type(&self) -> u8 {
        self.header.payload_type
    }
}

/// Encode a frame and append it to `dst`.
///
/// Wire format (V1):
/// ```text
/// ┌──────────┬──────────┬──────────┬──────────┬─────────────────────┐
/// │ Ver (1B) │ Seq      │ CRC      │ Type     │ Payload             │
/// │ 0x01     │ (2B LE)  │ (2B LE)  │ (1B)     │ (rest of the frame) │
/// └──────────┴──────────┴──────────┴──────────┴─────────────────────┘
/// ```
/// The legacy layout is identical without the version byte.
pub fn encode_frame(
    config: &FrameConfig,
    sequence: u16,
    payload_type: u8,
    payload: &[u8],
    dst: &mut BytesMut,
) -> Result<()> {
    let max = config.max_payload_size();
    if payload.len() > max {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max,
        });
    }

    let version = config.wire_version;
    let start = dst.len();
    dst.reserve(version.header_size() + payload.len());
    if version == WireVersion::V1 {
        dst.put_u8(FRAME_VERSION);
    }
    dst.put_u16_le(sequence);
    dst.put_u16_le(0);
    dst.put_u8(payload_type);
    dst.put_slice(payload);

    let offset = version.checksum_offset();
    let checksum = frame_checksum(&dst[start..], offset);
    let at = start + offset;
    dst[at..at + CHECKSUM_LEN].copy_from_slice(&checksum.to_le_bytes());
    Ok(())
}

/// Decode one frame from a complete datagram.
///
/// The checksum is verified before any field is interpreted.
pub fn decode_frame<'a>(config: &FrameConfig, bytes: &'a [u8]) -> Result<Frame<'a>> {
    let version = config.wire_version;
    let header_size = version.header_size();
    if bytes.len() < header_size {
        return Err(FrameError::TooShort {
            len: bytes.len(),
            min: header_size,
        });
    }

    let offset = version.checksum_offset();
    let stored = read_u16_le(bytes, offset);
    let computed = frame_checksum(bytes, offset);
    if computed != stored {
        return Err(FrameError::ChecksumMismatch { computed, stored });
    }

    if version == WireVersion::V1 && bytes[0] != FRAME_VERSION {
        return Err(FrameError::UnsupportedVersion(bytes[0]));
    }

    let header = FrameHeader {
        sequence: read_u16_le(bytes, version.sequence_offset()),
        checksum: stored,
        payload_type: bytes[version.type_offset()],
    };
    let payload = &bytes[header_size..];

    // Unknown tags are left to the payload registry to report.
    if let Ok(kind) = PayloadType::try_from(header.payload_type) {
        let min = kind.expected_length().min();
        if payload.len() < min {
            return Err(FrameError::TooShortForPayload {
                payload_type: header.payload_type,
                len: payload.len(),
                min,
            });
        }
    }

    Ok(Frame { header, payload })
}

/// CRC-16 over `frame`, reading the two bytes at `checksum_offset` as zero.
///
/// `frame` must be at least `checksum_offset + 2` bytes long.
pub fn frame_checksum(frame: &[u8], checksum_offset: usize) -> u16 {
    let mut digest = CRC16.digest();
    digest.update(&frame[..checksum_offset]);
    digest.update(&[0; CHECKSUM_LEN]);
    digest.update(&frame[checksum_offset + CHECKSUM_LEN..]);
    digest.finalize()
}

fn read_u16_le(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}
