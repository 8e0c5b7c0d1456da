use crate::addr::MacAddr;

/// Errors reported by link-layer operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The destination is not present in the peer table.
    #[error("peer {0} not found in peer table")]
    PeerNotFound(MacAddr),

    /// The peer is already present in the peer table.
    #[error("peer {0} already exists")]
    PeerExists(MacAddr),

    /// The peer table has reached its capacity.
    #[error("peer table full (max {max} peers)")]
    PeerTableFull { max: usize },

    /// The link refused or failed to transmit the frame.
    #[error("send to {destination} failed: {reason}")]
    SendFailed {
        destination: MacAddr,
        reason: String,
    },

    /// The link's transmit buffer is full.
    #[error("link transmit queue full")]
    QueueFull,

    /// The frame exceeds the link MTU.
    #[error("frame too large for link ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A textual address could not be parsed.
    #[error("invalid link address '{0}'")]
    InvalidAddress(String),

    /// An I/O error occurred on the underlying socket.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link has been shut down.
    #[error("link shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, LinkError>;
