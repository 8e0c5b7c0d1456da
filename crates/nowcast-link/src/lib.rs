//! Link-layer boundary for the nowcast protocol.
//!
//! The protocol engine never talks to a radio directly. It consumes the
//! [`Link`] trait defined here:
//! - connectionless `send` to a peer address or the broadcast address
//! - a non-blocking receive callback invoked for every inbound frame
//! - an asynchronous send-completion callback
//! - a peer table (`add_peer`, `remove_peer`, `peer_exists`, `peer_count`)
//!
//! Two implementations ship with the crate: [`MemoryMedium`] simulates a
//! shared radio channel inside one process, and [`UdpLink`] carries frames
//! over UDP datagrams so separate processes can talk to each other.

pub mod addr;
pub mod error;
pub mod memory;
mod peer_table;
pub mod traits;
pub mod udp;

pub use addr::{MacAddr, BROADCAST, MAC_LEN};
pub use error::{LinkError, Result};
pub use memory::{MemoryLink, MemoryMedium};
pub use traits::{Link, ReceiveHandler, SendHandler, SendStatus, DEFAULT_MAX_PEERS, LINK_MTU};
pub use udp::{UdpLink, UdpLinkConfig};
