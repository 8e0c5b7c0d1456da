use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::codec::{encode_frame, FrameConfig};
use crate::error::{FrameError, Result};

/// Payload type tag carried in the frame header.
///
/// Value 0 is reserved and never sent; it decodes as unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PayloadType {
    ChangePattern = 1,
    ChangeBrightness = 2,
    RegisterRequest = 3,
    RegistrationSuccessful = 4,
    Keepalive = 5,
}

impl PayloadType {
    /// Length rule for this payload type.
    pub const fn expected_length(self) -> ExpectedLength {
        match self {
            PayloadType::ChangePattern => ExpectedLength::AtLeast(0),
            PayloadType::ChangeBrightness => ExpectedLength::Exact(1),
            PayloadType::RegisterRequest
            | PayloadType::RegistrationSuccessful
            | PayloadType::Keepalive => ExpectedLength::Exact(0),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            PayloadType::ChangePattern => "change-pattern",
            PayloadType::ChangeBrightness => "change-brightness",
            PayloadType::RegisterRequest => "register-request",
            PayloadType::RegistrationSuccessful => "registration-successful",
            PayloadType::Keepalive => "keepalive",
        }
    }
}

impl TryFrom<u8> for PayloadType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PayloadType::ChangePattern),
            2 => Ok(PayloadType::ChangeBrightness),
            3 => Ok(PayloadType::RegisterRequest),
            4 => Ok(PayloadType::RegistrationSuccessful),
            5 => Ok(PayloadType::Keepalive),
            other => Err(FrameError::UnknownPayloadType(other)),
        }
    }
}

impl From<PayloadType> for u8 {
    fn from(value: PayloadType) -> Self {
        value as u8
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Payload length rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedLength {
    Exact(usize),
    AtLeast(usize),
}

impl ExpectedLength {
    /// Smallest length accepted by this rule.
    pub const fn min(self) -> usize {
        match self {
            ExpectedLength::Exact(n) | ExpectedLength::AtLeast(n) => n,
        }
    }

    pub const fn accepts(self, len: usize) -> bool {
        match self {
            ExpectedLength::Exact(n) => len == n,
            ExpectedLength::AtLeast(n) => len >= n,
        }
    }
}

impl fmt::Display for ExpectedLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedLength::Exact(n) => write!(f, "exactly {n} bytes"),
            ExpectedLength::AtLeast(n) => write!(f, "at least {n} bytes"),
        }
    }
}

/// Length rule for a raw payload type tag.
pub fn expected_length(payload_type: u8) -> Result<ExpectedLength> {
    PayloadType::try_from(payload_type).map(PayloadType::expected_length)
}

/// A typed, decoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Pattern name; the entire payload region is the UTF-8 text.
    ChangePattern { name: String },
    ChangeBrightness { level: u8 },
    RegisterRequest,
    RegistrationSuccessful,
    Keepalive,
}

impl Payload {
    pub fn pattern(name: impl Into<String>) -> Self {
        Payload::ChangePattern { name: name.into() }
    }

    pub fn brightness(level: u8) -> Self {
        Payload::ChangeBrightness { level }
    }

    pub fn payload_type(&self) -> PayloadType {
        match self {
            Payload::ChangePattern { .. } => PayloadType::ChangePattern,
            Payload::ChangeBrightness { .. } => PayloadType::ChangeBrightness,
            Payload::RegisterRequest => PayloadType::RegisterRequest,
            Payload::RegistrationSuccessful => PayloadType::RegistrationSuccessful,
            Payload::Keepalive => PayloadType::Keepalive,
        }
    }

    /// Payload bytes as they appear after the frame header.
    pub fn body(&self) -> &[u8] {
        match self {
            Payload::ChangePattern { name } => name.as_bytes(),
            Payload::ChangeBrightness { level } => std::slice::from_ref(level),
            Payload::RegisterRequest | Payload::RegistrationSuccessful | Payload::Keepalive => &[],
        }
    }
}

/// Decode the payload region of a frame.
pub fn decode_payload(payload_type: u8, bytes: &[u8]) -> Result<Payload> {
    let kind = PayloadType::try_from(payload_type)?;
    let rule = kind.expected_length();
    if !rule.accepts(bytes.len()) {
        return Err(FrameError::PayloadSizeMismatch {
            payload_type,
            len: bytes.len(),
            expected: rule.to_string(),
        });
    }

    Ok(match kind {
        PayloadType::ChangePattern => {
            let name = std::str::from_utf8(bytes).map_err(|_| FrameError::InvalidPatternName)?;
            Payload::ChangePattern {
                name: name.to_owned(),
            }
        }
        PayloadType::ChangeBrightness => Payload::ChangeBrightness { level: bytes[0] },
        PayloadType::RegisterRequest => Payload::RegisterRequest,
        PayloadType::RegistrationSuccessful => Payload::RegistrationSuccessful,
        PayloadType::Keepalive => Payload::Keepalive,
    })
}

/// Encode a typed payload into a complete frame.
pub fn encode_payload(config: &FrameConfig, sequence: u16, payload: &Payload) -> Result<Bytes> {
    let body = payload.body();
    let mut buf = BytesMut::with_capacity(config.header_size() + body.len());
    encode_frame(
        config,
        sequence,
        payload.payload_type().into(),
        body,
        &mut buf,
    )?;
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_frame;

    #[test]
    fn test_wire_values() {
        assert_eq!(u8::from(PayloadType::ChangePattern), 1);
        assert_eq!(u8::from(PayloadType::Keepalive), 5);
        for value in 1..=5u8 {
            assert_eq!(u8::from(PayloadType::try_from(value).unwrap()), value);
        }
    }

    #[test]
    fn test_reserved_and_unknown_tags() {
        assert_eq!(
            PayloadType::try_from(0),
            Err(FrameError::UnknownPayloadType(0))
        );
        assert_eq!(
            decode_payload(0xFF, &[]),
            Err(FrameError::UnknownPayloadType(0xFF))
        );
        assert_eq!(
            expected_length(6),
            Err(FrameError::UnknownPayloadType(6))
        );
    }

    #[test]
    fn test_expected_lengths() {
        assert_eq!(expected_length(1), Ok(ExpectedLength::AtLeast(0)));
        assert_eq!(expected_length(2), Ok(ExpectedLength::Exact(1)));
        assert_eq!(expected_length(3), Ok(ExpectedLength::Exact(0)));
        assert_eq!(expected_length(4), Ok(ExpectedLength::Exact(0)));
        assert_eq!(expected_length(5), Ok(ExpectedLength::Exact(0)));
    }

    #[test]
    fn test_pattern_consumes_remainder() {
        let payload = decode_payload(1, b"slow fade").unwrap();
        assert_eq!(payload, Payload::pattern("slow fade"));

        let empty = decode_payload(1, b"").unwrap();
        assert_eq!(empty, Payload::pattern(""));
    }

    #[test]
    fn test_pattern_rejects_invalid_utf8() {
        assert_eq!(
            decode_payload(1, &[0x66, 0xFF, 0xFE]),
            Err(FrameError::InvalidPatternName)
        );
    }

    #[test]
    fn test_brightness_size_mismatch() {
        assert_eq!(decode_payload(2, &[200]).unwrap(), Payload::brightness(200));

        let err = decode_payload(2, &[1, 2]).unwrap_err();
        assert_eq!(
            err,
            FrameError::PayloadSizeMismatch {
                payload_type: 2,
                len: 2,
                expected: "exactly 1 bytes".into(),
            }
        );
    }

    #[test]
    fn test_empty_variants_reject_trailing_bytes() {
        assert_eq!(decode_payload(5, &[]).unwrap(), Payload::Keepalive);
        assert!(matches!(
            decode_payload(3, &[0]),
            Err(FrameError::PayloadSizeMismatch { .. })
        ));
    }

    #[test]
    fn test_encode_payload_decodes_back() {
        let config = FrameConfig::default();
        let cases = [
            Payload::pattern("rainbow"),
            Payload::brightness(17),
            Payload::RegisterRequest,
            Payload::RegistrationSuccessful,
            Payload::Keepalive,
        ];

        for (seq, payload) in cases.into_iter().enumerate() {
            let bytes = encode_payload(&config, seq as u16, &payload).unwrap();
            let frame = decode_frame(&config, &bytes).unwrap();
            assert_eq!(frame.sequence(), seq as u16);
            assert_eq!(
                decode_payload(frame.payload_type(), frame.payload).unwrap(),
                payload
            );
        }
    }

    #[test]
    fn test_encode_payload_rejects_long_pattern() {
        let config = FrameConfig::default();
        let name = "x".repeat(config.max_payload_size() + 1);
        assert!(matches!(
            encode_payload(&config, 1, &Payload::pattern(name)),
            Err(FrameError::PayloadTooLarge { .. })
        ));
    }
}
