use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use nowcast_frame::{FrameConfig, WireVersion};
use nowcast_link::{MacAddr, UdpLink, UdpLinkConfig};
use nowcast_peer::NodeConfig;

use crate::exit::{link_error, node_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod frame;
pub mod receiver;
pub mod sender;
pub mod simulate;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a sender station over UDP.
    Sender(SenderArgs),
    /// Run a receiver station over UDP and print application messages.
    Receiver(ReceiverArgs),
    /// Run one sender and several receivers on an in-memory medium.
    Simulate(SimulateArgs),
    /// Encode or decode a single frame.
    #[command(subcommand)]
    Frame(FrameCommand),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Sender(args) => sender::run(args, format),
        Command::Receiver(args) => receiver::run(args, format),
        Command::Simulate(args) => simulate::run(args, format),
        Command::Frame(command) => frame::run(command, format),
        Command::Version(args) => version::run(args),
    }
}

/// Protocol settings shared by every node-running command.
#[derive(Args, Debug, Default)]
pub struct NodeArgs {
    /// JSON node configuration file. Flags below override it.
    #[arg(long, value_name = "FILE", env = "NOWCAST_CONFIG")]
    pub config: Option<PathBuf>,
    /// Use the 5-byte header without a version byte.
    #[arg(long)]
    pub legacy_wire: bool,
    /// Capacity of the inbound and outbound frame queues.
    #[arg(long, value_name = "N")]
    pub queue_capacity: Option<usize>,
    /// Period of the registration broadcast (e.g. 1s, 500ms).
    #[arg(long, value_name = "DURATION")]
    pub registration_interval: Option<String>,
    /// Period of the sender's keepalives.
    #[arg(long, value_name = "DURATION")]
    pub keepalive_interval: Option<String>,
    /// Silence after which a receiver registers again.
    #[arg(long, value_name = "DURATION")]
    pub keepalive_timeout: Option<String>,
}

impl NodeArgs {
    /// Load the config file, if any, and apply flag overrides.
    pub fn resolve(&self) -> CliResult<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path).map_err(|err| {
                node_error(&format!("failed loading {}", path.display()), err)
            })?,
            None => NodeConfig::default(),
        };

        if self.legacy_wire {
            config.frame = FrameConfig {
                wire_version: WireVersion::Legacy,
                ..config.frame
            };
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(interval) = &self.registration_interval {
            config.registration_interval = parse_duration(interval)?;
        }
        if let Some(interval) = &self.keepalive_interval {
            config.keepalive_interval = parse_duration(interval)?;
        }
        if let Some(timeout) = &self.keepalive_timeout {
            config.keepalive_timeout = parse_duration(timeout)?;
        }

        config
            .validate()
            .map_err(|err| node_error("invalid configuration", err))?;
        Ok(config)
    }
}

/// UDP emulation of the radio link.
#[derive(Args, Debug)]
pub struct LinkArgs {
    /// Station address (aa:bb:cc:dd:ee:ff).
    #[arg(long, value_name = "MAC", env = "NOWCAST_ADDRESS")]
    pub address: MacAddr,
    /// Local UDP socket to bind.
    #[arg(long, value_name = "ADDR", default_value = "0.0.0.0:4747")]
    pub bind: SocketAddr,
    /// UDP sockets of the other stations (comma-separated).
    #[arg(long = "neighbor", value_name = "ADDR", value_delimiter = ',', required = true)]
    pub neighbors: Vec<SocketAddr>,
}

impl LinkArgs {
    pub fn bind_link(&self) -> CliResult<Arc<UdpLink>> {
        let config = UdpLinkConfig::new(self.address, self.bind)
            .with_neighbors(self.neighbors.clone());
        UdpLink::bind(config)
            .map(Arc::new)
            .map_err(|err| link_error(&format!("bind {} failed", self.bind), err))
    }
}

#[derive(Args, Debug)]
pub struct SenderArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    #[command(flatten)]
    pub node: NodeArgs,
    /// Patterns to cycle through (comma-separated).
    #[arg(long = "pattern", value_name = "NAME", value_delimiter = ',')]
    pub patterns: Vec<String>,
    /// Time between pattern changes (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s")]
    pub interval: String,
    /// Brightness level to send once at startup.
    #[arg(long, value_name = "LEVEL")]
    pub brightness: Option<u8>,
    /// Exit after sending N pattern changes.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ReceiverArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    #[command(flatten)]
    pub node: NodeArgs,
    /// Require an explicit acknowledgement; ignore unicast traffic as proof of registration.
    #[arg(long)]
    pub no_implicit_registration: bool,
    /// Exit after receiving N application messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub node: NodeArgs,
    /// Number of receivers.
    #[arg(long, default_value = "3")]
    pub receivers: usize,
    /// How long to run (e.g. 10s, 1500ms).
    #[arg(long, default_value = "10s")]
    pub duration: String,
    /// Patterns to cycle through (comma-separated).
    #[arg(
        long = "pattern",
        value_name = "NAME",
        value_delimiter = ',',
        default_value = "rainbow,comet,aurora"
    )]
    pub patterns: Vec<String>,
    /// Time between pattern changes.
    #[arg(long, default_value = "1s")]
    pub interval: String,
    /// Drop every Nth frame on the medium.
    #[arg(long, value_name = "N")]
    pub drop_every: Option<u64>,
    /// Only register receivers through explicit acknowledgements.
    #[arg(long)]
    pub no_implicit_registration: bool,
}

#[derive(Subcommand, Debug)]
pub enum FrameCommand {
    /// Encode a payload into a frame and print it as hex.
    Encode(FrameEncodeArgs),
    /// Decode a hex frame.
    Decode(FrameDecodeArgs),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum PayloadKind {
    Pattern,
    Brightness,
    RegisterRequest,
    RegistrationSuccessful,
    Keepalive,
}

#[derive(Args, Debug)]
pub struct FrameEncodeArgs {
    /// Payload type.
    pub kind: PayloadKind,
    /// Pattern name or brightness level.
    pub value: Option<String>,
    /// Sequence number.
    #[arg(long, default_value = "1")]
    pub seq: u16,
    /// Use the 5-byte header without a version byte.
    #[arg(long)]
    pub legacy: bool,
}

#[derive(Args, Debug)]
pub struct FrameDecodeArgs {
    /// Frame bytes as hex.
    pub hex: String,
    /// Parse the 5-byte header without a version byte.
    #[arg(long)]
    pub legacy: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn frame_config(legacy: bool) -> FrameConfig {
    if legacy {
        FrameConfig::legacy()
    } else {
        FrameConfig::default()
    }
}

pub fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime setup failed: {err}")))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert_eq!(parse_duration("").unwrap_err().code, USAGE);
    }

    #[test]
    fn flags_override_defaults() {
        let args = NodeArgs {
            legacy_wire: true,
            queue_capacity: Some(12),
            keepalive_timeout: Some("30s".into()),
            ..NodeArgs::default()
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.frame.wire_version, WireVersion::Legacy);
        assert_eq!(config.queue_capacity, 12);
        assert_eq!(config.keepalive_timeout, Duration::from_secs(30));
        assert_eq!(config.keepalive_interval, NodeConfig::default().keepalive_interval);
    }

    #[test]
    fn invalid_overrides_are_usage_errors() {
        let args = NodeArgs {
            queue_capacity: Some(0),
            ..NodeArgs::default()
        };
        assert_eq!(args.resolve().unwrap_err().code, USAGE);
    }

    #[test]
    fn missing_config_file_is_reported() {
        let args = NodeArgs {
            config: Some(PathBuf::from("/nonexistent/nowcast.json")),
            ..NodeArgs::default()
        };
        let err = args.resolve().unwrap_err();
        assert!(err.message.contains("/nonexistent/nowcast.json"));
    }
}
