use std::sync::Arc;

use crate::addr::MacAddr;
use crate::error::Result;

/// Maximum frame size accepted by the link, in bytes.
pub const LINK_MTU: usize = 1470;

/// Default capacity of a link's peer table.
pub const DEFAULT_MAX_PEERS: usize = 20;

/// Callback invoked for every inbound frame with `(source, bytes)`.
///
/// Runs on the link's delivery context. It must copy what it needs and
/// return promptly; it must never block.
pub type ReceiveHandler = Arc<dyn Fn(MacAddr, &[u8]) + Send + Sync>;

/// Callback invoked once a transmission attempt completes.
pub type SendHandler = Arc<dyn Fn(MacAddr, SendStatus) + Send + Sync>;

/// Outcome of a transmission, reported through the [`SendHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Success,
    Failure,
}

/// A connectionless, lossy datagram link with a local peer table.
///
/// Frames carry no ordering, deduplication or delivery guarantee. A
/// destination (including [`crate::BROADCAST`]) must be in the peer table
/// before `send` accepts it.
pub trait Link: Send + Sync + 'static {
    /// This station's own address.
    fn address(&self) -> MacAddr;

    /// Queue a frame for transmission.
    ///
    /// `Ok` means the link accepted the frame; the actual outcome arrives
    /// later through the registered [`SendHandler`].
    fn send(&self, destination: MacAddr, frame: &[u8]) -> Result<()>;

    /// Install the inbound frame callback, replacing any previous one.
    fn register_receive_handler(&self, handler: ReceiveHandler);

    /// Install the send-completion callback, replacing any previous one.
    fn register_send_handler(&self, handler: SendHandler);

    /// Add a peer to the peer table.
    fn add_peer(&self, peer: MacAddr) -> Result<()>;

    /// Remove a peer from the peer table.
    fn remove_peer(&self, peer: MacAddr) -> Result<()>;

    /// Returns true if the peer is in the peer table.
    fn peer_exists(&self, peer: MacAddr) -> bool;

    /// Number of entries in the peer table.
    fn peer_count(&self) -> usize;

    /// Snapshot of the peer table.
    fn peers(&self) -> Vec<MacAddr>;
}

impl<L: Link + ?Sized> Link for Arc<L> {
    fn address(&self) -> MacAddr {
        (**self).address()
    }

    fn send(&self, destination: MacAddr, frame: &[u8]) -> Result<()> {
        (**self).send(destination, frame)
    }

    fn register_receive_handler(&self, handler: ReceiveHandler) {
        (**self).register_receive_handler(handler)
    }

    fn register_send_handler(&self, handler: SendHandler) {
        (**self).register_send_handler(handler)
    }

    fn add_peer(&self, peer: MacAddr) -> Result<()> {
        (**self).add_peer(peer)
    }

    fn remove_peer(&self, peer: MacAddr) -> Result<()> {
        (**self).remove_peer(peer)
    }

    fn peer_exists(&self, peer: MacAddr) -> bool {
        (**self).peer_exists(peer)
    }

    fn peer_count(&self) -> usize {
        (**self).peer_count()
    }

    fn peers(&self) -> Vec<MacAddr> {
        (**self).peers()
    }
}
