use std::fmt;
use std::io;

use nowcast_frame::FrameError;
use nowcast_link::LinkError;
use nowcast_peer::NodeError;

// Exit codes follow sysexits where one fits.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const LINK_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::AddrInUse | io::ErrorKind::AddrNotAvailable => LINK_ERROR,
        io::ErrorKind::NotFound => USAGE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn link_error(context: &str, err: LinkError) -> CliError {
    match err {
        LinkError::Io(source) => io_error(context, source),
        LinkError::InvalidAddress(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(LINK_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn node_error(context: &str, err: NodeError) -> CliError {
    match err {
        NodeError::Link(err) => link_error(context, err),
        NodeError::Frame(err) => frame_error(context, err),
        NodeError::Admission(_) => CliError::new(LINK_ERROR, format!("{context}: {err}")),
        NodeError::QueueFull { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        NodeError::Stopped => CliError::new(FAILURE, format!("{context}: {err}")),
        NodeError::InvalidConfig(_) | NodeError::Json(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        NodeError::Io(source) => io_error(context, source),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use nowcast_link::MacAddr;

    use super::*;

    #[test]
    fn queue_full_maps_to_timeout() {
        let err = node_error(
            "send failed",
            NodeError::QueueFull {
                capacity: 6,
                waited: Duration::from_millis(512),
            },
        );
        assert_eq!(err.code, TIMEOUT);
        assert!(err.message.starts_with("send failed: "));
    }

    #[test]
    fn nested_link_errors_keep_their_code() {
        let err = node_error(
            "start failed",
            NodeError::Link(LinkError::Io(io::Error::from(io::ErrorKind::AddrInUse))),
        );
        assert_eq!(err.code, LINK_ERROR);

        let err = link_error("parse", LinkError::InvalidAddress("zz".into()));
        assert_eq!(err.code, USAGE);

        let err = link_error("send", LinkError::PeerNotFound(MacAddr([2, 0, 0, 0, 0, 1])));
        assert_eq!(err.code, LINK_ERROR);
    }

    #[test]
    fn decode_failures_are_invalid_data() {
        let err = frame_error("decode failed", FrameError::UnknownPayloadType(9));
        assert_eq!(err.code, DATA_INVALID);
        assert_eq!(err.to_string(), "decode failed: unknown payload type 0x09");
    }
}
