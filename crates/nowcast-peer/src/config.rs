use std::path::Path;
use std::time::Duration;

use nowcast_frame::FrameConfig;
use serde::{Deserialize, Serialize};

use crate::error::{NodeError, Result};
use crate::sequence::SequenceSpace;

/// Node configuration shared by the sender and receiver roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Capacity of the inbound and outbound frame queues.
    pub queue_capacity: usize,
    /// Capacity of the channel carrying application messages.
    pub app_queue_capacity: usize,
    /// How long a producer waits for outbound queue space.
    #[serde(rename = "submit_timeout_ms", with = "duration_ms")]
    pub submit_timeout: Duration,
    /// Period of the registration broadcast.
    #[serde(rename = "registration_interval_ms", with = "duration_ms")]
    pub registration_interval: Duration,
    /// Period of the keepalive liveness check.
    #[serde(rename = "liveness_check_interval_ms", with = "duration_ms")]
    pub liveness_check_interval: Duration,
    /// Silence after which a registered receiver drops back to unregistered.
    #[serde(rename = "keepalive_timeout_ms", with = "duration_ms")]
    pub keepalive_timeout: Duration,
    /// Period of the sender's keepalive emitter.
    #[serde(rename = "keepalive_interval_ms", with = "duration_ms")]
    pub keepalive_interval: Duration,
    /// Treat unicast keepalives and data from a sender as proof of registration.
    pub implicit_registration: bool,
    /// Logical width of the sequence counter, in bits (1..=16).
    pub sequence_bits: u8,
    /// Wire format settings.
    pub frame: FrameConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 6,
            app_queue_capacity: 16,
            submit_timeout: Duration::from_millis(512),
            registration_interval: Duration::from_secs(1),
            liveness_check_interval: Duration::from_secs(1),
            keepalive_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(5),
            implicit_registration: true,
            sequence_bits: SequenceSpace::DEFAULT_BITS,
            frame: FrameConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Builder: set both frame queue capacities.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Builder: set the application channel capacity.
    pub fn with_app_queue_capacity(mut self, capacity: usize) -> Self {
        self.app_queue_capacity = capacity;
        self
    }

    /// Builder: set the outbound submit timeout.
    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    /// Builder: set the registration broadcast period.
    pub fn with_registration_interval(mut self, interval: Duration) -> Self {
        self.registration_interval = interval;
        self
    }

    /// Builder: set keepalive timing (emit period, receiver timeout).
    pub fn with_keepalive(mut self, interval: Duration, timeout: Duration) -> Self {
        self.keepalive_interval = interval;
        self.keepalive_timeout = timeout;
        self
    }

    /// Builder: enable or disable implicit registration.
    pub fn with_implicit_registration(mut self, enabled: bool) -> Self {
        self.implicit_registration = enabled;
        self
    }

    /// Builder: set the logical sequence width.
    pub fn with_sequence_bits(mut self, bits: u8) -> Self {
        self.sequence_bits = bits;
        self
    }

    /// Builder: set the wire format.
    pub fn with_frame(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    pub fn sequence_space(&self) -> SequenceSpace {
        SequenceSpace::new(self.sequence_bits)
    }

    /// Reject settings the pipelines cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 || self.app_queue_capacity == 0 {
            return Err(NodeError::InvalidConfig(
                "queue capacities must be at least 1".into(),
            ));
        }
        if !(1..=16).contains(&self.sequence_bits) {
            return Err(NodeError::InvalidConfig(format!(
                "sequence_bits must be within 1..=16, got {}",
                self.sequence_bits
            )));
        }
        let periods = [
            ("registration_interval", self.registration_interval),
            ("liveness_check_interval", self.liveness_check_interval),
            ("keepalive_interval", self.keepalive_interval),
        ];
        for (name, period) in periods {
            if period.is_zero() {
                return Err(NodeError::InvalidConfig(format!("{name} must be non-zero")));
            }
        }
        if self.frame.max_payload_size() == 0 {
            return Err(NodeError::InvalidConfig(format!(
                "max_frame_size {} leaves no room for a payload",
                self.frame.max_frame_size
            )));
        }
        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use nowcast_frame::WireVersion;

    use super::*;

    #[test]
    fn defaults_match_protocol_timing() {
        let config = NodeConfig::default();
        assert_eq!(config.queue_capacity, 6);
        assert_eq!(config.registration_interval, Duration::from_secs(1));
        assert_eq!(config.keepalive_timeout, Duration::from_secs(10));
        assert_eq!(config.keepalive_interval, Duration::from_secs(5));
        assert!(config.implicit_registration);
        assert_eq!(config.sequence_space().wrap_high(), 200);
        config.validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = NodeConfig::from_json(
            r#"{ "keepalive_timeout_ms": 2500, "frame": { "wire_version": "legacy" } }"#,
        )
        .unwrap();
        assert_eq!(config.keepalive_timeout, Duration::from_millis(2500));
        assert_eq!(config.frame.wire_version, WireVersion::Legacy);
        assert_eq!(config.frame.max_frame_size, 1470);
        assert_eq!(config.queue_capacity, 6);
    }

    #[test]
    fn json_roundtrip_uses_milliseconds() {
        let config = NodeConfig::default().with_submit_timeout(Duration::from_millis(75));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["submit_timeout_ms"], 75);

        let back: NodeConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let err = NodeConfig::from_json(r#"{ "queue_capacity": 0 }"#).unwrap_err();
        assert!(matches!(err, NodeError::InvalidConfig(_)));
    }

    #[test]
    fn validate_rejects_wide_sequence_space() {
        let err = NodeConfig::default()
            .with_sequence_bits(17)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("sequence_bits"));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = NodeConfig::load("/nonexistent/nowcast.json").unwrap_err();
        assert!(matches!(err, NodeError::Io(_)));
    }
}
