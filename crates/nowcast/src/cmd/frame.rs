use nowcast_frame::{decode_frame, decode_payload, encode_payload, Payload};

use crate::cmd::{frame_config, FrameCommand, FrameDecodeArgs, FrameEncodeArgs, PayloadKind};
use crate::exit::{frame_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{from_hex, print_frame, FrameReport, OutputFormat};

pub fn run(command: FrameCommand, format: OutputFormat) -> CliResult<i32> {
    let report = match command {
        FrameCommand::Encode(args) => encode(&args)?,
        FrameCommand::Decode(args) => decode(&args)?,
    };
    print_frame(&report, format);
    Ok(SUCCESS)
}

fn encode(args: &FrameEncodeArgs) -> CliResult<FrameReport> {
    let config = frame_config(args.legacy);
    let payload = build_payload(args.kind, args.value.as_deref())?;
    let bytes = encode_payload(&config, args.seq, &payload)
        .map_err(|err| frame_error("encode failed", err))?;
    let frame = decode_frame(&config, &bytes).map_err(|err| frame_error("encode failed", err))?;
    Ok(FrameReport::new(
        config.wire_version,
        args.seq,
        frame.header.checksum,
        &payload,
        &bytes,
    ))
}

fn decode(args: &FrameDecodeArgs) -> CliResult<FrameReport> {
    let config = frame_config(args.legacy);
    let bytes =
        from_hex(&args.hex).map_err(|err| CliError::new(USAGE, format!("invalid hex: {err}")))?;
    let frame = decode_frame(&config, &bytes).map_err(|err| frame_error("decode failed", err))?;
    let payload = decode_payload(frame.payload_type(), frame.payload)
        .map_err(|err| frame_error("decode failed", err))?;
    Ok(FrameReport::new(
        config.wire_version,
        frame.sequence(),
        frame.header.checksum,
        &payload,
        &bytes,
    ))
}

fn build_payload(kind: PayloadKind, value: Option<&str>) -> CliResult<Payload> {
    let payload = match kind {
        PayloadKind::Pattern => {
            let name = value.ok_or_else(|| CliError::new(USAGE, "pattern name required"))?;
            return Ok(Payload::pattern(name));
        }
        PayloadKind::Brightness => {
            let level = value
                .ok_or_else(|| CliError::new(USAGE, "brightness level required"))?
                .parse::<u8>()
                .map_err(|err| CliError::new(USAGE, format!("invalid brightness level: {err}")))?;
            return Ok(Payload::brightness(level));
        }
        PayloadKind::RegisterRequest => Payload::RegisterRequest,
        PayloadKind::RegistrationSuccessful => Payload::RegistrationSuccessful,
        PayloadKind::Keepalive => Payload::Keepalive,
    };
    if value.is_some() {
        return Err(CliError::new(
            USAGE,
            format!("{} takes no value", payload.payload_type()),
        ));
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::DATA_INVALID;

    #[test]
    fn encoded_frame_decodes_back() {
        let encoded = encode(&FrameEncodeArgs {
            kind: PayloadKind::Pattern,
            value: Some("aurora".into()),
            seq: 42,
            legacy: true,
        })
        .unwrap();
        assert_eq!(encoded.bytes.len(), 5 + "aurora".len());

        let decoded = decode(&FrameDecodeArgs {
            hex: encoded.frame.clone(),
            legacy: true,
        })
        .unwrap();
        assert_eq!(decoded.sequence, 42);
        assert_eq!(decoded.checksum, encoded.checksum);
        assert_eq!(decoded.pattern.as_deref(), Some("aurora"));
    }

    #[test]
    fn corrupted_frame_is_invalid_data() {
        let mut encoded = encode(&FrameEncodeArgs {
            kind: PayloadKind::Brightness,
            value: Some("200".into()),
            seq: 1,
            legacy: false,
        })
        .unwrap();
        let last = encoded.bytes.len() - 1;
        encoded.bytes[last] ^= 0xFF;

        let err = decode(&FrameDecodeArgs {
            hex: crate::output::to_hex(&encoded.bytes),
            legacy: false,
        })
        .unwrap_err();
        assert_eq!(err.code, DATA_INVALID);
    }

    #[test]
    fn payload_values_are_checked() {
        assert!(build_payload(PayloadKind::Pattern, None).is_err());
        assert!(build_payload(PayloadKind::Brightness, Some("256")).is_err());
        assert!(build_payload(PayloadKind::Keepalive, Some("x")).is_err());
        assert_eq!(
            build_payload(PayloadKind::Brightness, Some("7")).unwrap(),
            Payload::brightness(7)
        );
    }
}
