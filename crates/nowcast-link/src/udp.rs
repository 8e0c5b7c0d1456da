use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::addr::{MacAddr, MAC_LEN};
use crate::error::{LinkError, Result};
use crate::peer_table::PeerTable;
use crate::traits::{Link, ReceiveHandler, SendHandler, SendStatus, DEFAULT_MAX_PEERS, LINK_MTU};

/// Datagram prefix: destination address followed by source address.
const ENVELOPE_HEADER: usize = 2 * MAC_LEN;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for a [`UdpLink`].
#[derive(Debug, Clone)]
pub struct UdpLinkConfig {
    /// Station address announced as the source of every frame.
    pub address: MacAddr,
    /// Local socket address to bind.
    pub bind: SocketAddr,
    /// Socket addresses of the other stations sharing the emulated channel.
    pub neighbors: Vec<SocketAddr>,
    /// Peer table capacity.
    pub max_peers: usize,
}

impl UdpLinkConfig {
    /// Create a config with the default peer-table capacity.
    pub fn new(address: MacAddr, bind: SocketAddr) -> Self {
        Self {
            address,
            bind,
            neighbors: Vec::new(),
            max_peers: DEFAULT_MAX_PEERS,
        }
    }

    /// Set the neighbor list.
    pub fn with_neighbors(mut self, neighbors: Vec<SocketAddr>) -> Self {
        self.neighbors = neighbors;
        self
    }
}

/// A link emulated over UDP.
///
/// Every frame is sent to every neighbor as one datagram
/// `[destination (6) | source (6) | frame]`. Receivers keep datagrams
/// addressed to themselves or to the broadcast address, which reproduces the
/// shared-channel semantics of a radio link between processes.
pub struct UdpLink {
    address: MacAddr,
    socket: UdpSocket,
    neighbors: RwLock<Vec<SocketAddr>>,
    peers: PeerTable,
    receive_handler: Arc<RwLock<Option<ReceiveHandler>>>,
    send_handler: RwLock<Option<SendHandler>>,
    running: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl UdpLink {
    /// Bind the socket and start the receive thread.
    pub fn bind(config: UdpLinkConfig) -> Result<Self> {
        let socket = UdpSocket::bind(config.bind)?;
        let reader_socket = socket.try_clone()?;
        reader_socket.set_read_timeout(Some(POLL_INTERVAL))?;

        let receive_handler: Arc<RwLock<Option<ReceiveHandler>>> = Arc::new(RwLock::new(None));
        let running = Arc::new(AtomicBool::new(true));

        let reader = {
            let handler = Arc::clone(&receive_handler);
            let running = Arc::clone(&running);
            let address = config.address;
            std::thread::Builder::new()
                .name(format!("nowcast-udp-{address}"))
                .spawn(move || read_loop(reader_socket, address, handler, running))?
        };

        tracing::debug!(
            station = %config.address,
            bind = %socket.local_addr()?,
            neighbors = config.neighbors.len(),
            "udp link bound"
        );

        Ok(Self {
            address: config.address,
            socket,
            neighbors: RwLock::new(config.neighbors),
            peers: PeerTable::new(config.max_peers),
            receive_handler,
            send_handler: RwLock::new(None),
            running,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// Actual bound socket address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Add a neighbor after construction.
    pub fn add_neighbor(&self, neighbor: SocketAddr) {
        self.neighbors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(neighbor);
    }

    /// Stop the receive thread. Further sends fail with [`LinkError::Shutdown`].
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    fn report(&self, destination: MacAddr, status: SendStatus) {
        let handler = self
            .send_handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler(destination, status);
        }
    }
}

fn read_loop(
    socket: UdpSocket,
    address: MacAddr,
    handler: Arc<RwLock<Option<ReceiveHandler>>>,
    running: Arc<AtomicBool>,
) {
    let mut buf = [0u8; ENVELOPE_HEADER + LINK_MTU];

    while running.load(Ordering::SeqCst) {
        let read = match socket.recv_from(&mut buf) {
            Ok((n, _)) => n,
            Err(err)
                if err.kind() == ErrorKind::WouldBlock
                    || err.kind() == ErrorKind::TimedOut
                    || err.kind() == ErrorKind::Interrupted =>
            {
                continue;
            }
            // ICMP unreachable from a neighbor that is not up yet.
            Err(err)
                if err.kind() == ErrorKind::ConnectionRefused
                    || err.kind() == ErrorKind::ConnectionReset =>
            {
                tracing::trace!(station = %address, error = %err, "neighbor unreachable");
                continue;
            }
            Err(err) => {
                tracing::error!(station = %address, error = %err, "udp receive failed");
                break;
            }
        };

        let Some((destination, source)) = parse_envelope(&buf[..read]) else {
            tracing::trace!(station = %address, len = read, "runt datagram ignored");
            continue;
        };
        if source == address || (destination != address && !destination.is_broadcast()) {
            continue;
        }

        let handler = handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler(source, &buf[ENVELOPE_HEADER..read]);
        }
    }
}

fn parse_envelope(datagram: &[u8]) -> Option<(MacAddr, MacAddr)> {
    if datagram.len() < ENVELOPE_HEADER {
        return None;
    }
    let destination = MacAddr::from_slice(&datagram[..MAC_LEN])?;
    let source = MacAddr::from_slice(&datagram[MAC_LEN..ENVELOPE_HEADER])?;
    Some((destination, source))
}

impl Link for UdpLink {
    fn address(&self) -> MacAddr {
        self.address
    }

    fn send(&self, destination: MacAddr, frame: &[u8]) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(LinkError::Shutdown);
        }
        if frame.len() > LINK_MTU {
            return Err(LinkError::FrameTooLarge {
                size: frame.len(),
                max: LINK_MTU,
            });
        }
        if !self.peers.contains(destination) {
            return Err(LinkError::PeerNotFound(destination));
        }

        let mut datagram = Vec::with_capacity(ENVELOPE_HEADER + frame.len());
        datagram.extend_from_slice(&destination.octets());
        datagram.extend_from_slice(&self.address.octets());
        datagram.extend_from_slice(frame);

        let neighbors = self
            .neighbors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if neighbors.is_empty() {
            return Err(LinkError::SendFailed {
                destination,
                reason: "no neighbors configured".into(),
            });
        }

        let mut status = SendStatus::Success;
        for neighbor in neighbors {
            match self.socket.send_to(&datagram, neighbor) {
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Err(LinkError::QueueFull),
                Err(err) => {
                    tracing::debug!(%neighbor, error = %err, "udp send failed");
                    status = SendStatus::Failure;
                }
            }
        }

        self.report(destination, status);
        Ok(())
    }

    fn register_receive_handler(&self, handler: ReceiveHandler) {
        *self
            .receive_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn register_send_handler(&self, handler: SendHandler) {
        *self
            .send_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn add_peer(&self, peer: MacAddr) -> Result<()> {
        self.peers.add(peer)
    }

    fn remove_peer(&self, peer: MacAddr) -> Result<()> {
        self.peers.remove(peer)
    }

    fn peer_exists(&self, peer: MacAddr) -> bool {
        self.peers.contains(peer)
    }

    fn peer_count(&self) -> usize {
        self.peers.len()
    }

    fn peers(&self) -> Vec<MacAddr> {
        self.peers.snapshot()
    }
}

impl Drop for UdpLink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for UdpLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpLink")
            .field("address", &self.address)
            .field("local_addr", &self.socket.local_addr().ok())
            .finish()
    }
}
