use std::time::Duration;

use nowcast_link::{LinkError, MacAddr};

/// A frame rejected by the per-peer sequence filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SequenceError {
    #[error("duplicate or stale sequence {incoming} (last accepted {last})")]
    DuplicateOrStale { last: u16, incoming: u16 },
}

/// Errors raised while admitting a peer.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// The link refused the new peer-table entry.
    #[error("failed to add peer {peer}: {source}")]
    AddPeerFailed {
        peer: MacAddr,
        #[source]
        source: LinkError,
    },
}

/// Errors that can occur in node operations.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Link-level error.
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] nowcast_frame::FrameError),

    /// Peer admission failed.
    #[error("admission error: {0}")]
    Admission(#[from] AdmissionError),

    /// The outbound queue stayed full for the whole submit timeout.
    #[error("outbound queue full (capacity {capacity}, waited {waited:?})")]
    QueueFull { capacity: usize, waited: Duration },

    /// The node's workers have stopped.
    #[error("node stopped")]
    Stopped,

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error while loading configuration.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NodeError>;
