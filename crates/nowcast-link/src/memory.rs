use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use crate::addr::MacAddr;
use crate::error::{LinkError, Result};
use crate::peer_table::PeerTable;
use crate::traits::{Link, ReceiveHandler, SendHandler, SendStatus, DEFAULT_MAX_PEERS, LINK_MTU};

/// Decides whether a frame travelling `source -> destination` is lost.
pub type LossFilter = Arc<dyn Fn(MacAddr, MacAddr, &[u8]) -> bool + Send + Sync>;

/// An in-process shared radio channel.
///
/// Every attached [`MemoryLink`] hears broadcasts from every other station.
/// Delivery is synchronous: the receiver's callback runs on the sender's
/// thread before `send` returns.
#[derive(Clone, Default)]
pub struct MemoryMedium {
    inner: Arc<MediumInner>,
}

#[derive(Default)]
struct MediumInner {
    stations: Mutex<HashMap<MacAddr, Weak<MemoryLink>>>,
    loss: RwLock<Option<LossFilter>>,
}

impl MemoryMedium {
    /// Create an empty medium.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a station with the default peer-table capacity.
    pub fn attach(&self, address: MacAddr) -> Arc<MemoryLink> {
        self.attach_with_capacity(address, DEFAULT_MAX_PEERS)
    }

    /// Attach a station with an explicit peer-table capacity.
    pub fn attach_with_capacity(&self, address: MacAddr, max_peers: usize) -> Arc<MemoryLink> {
        let link = Arc::new(MemoryLink {
            address,
            medium: Arc::clone(&self.inner),
            peers: PeerTable::new(max_peers),
            receive_handler: RwLock::new(None),
            send_handler: RwLock::new(None),
        });
        self.inner
            .stations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address, Arc::downgrade(&link));
        link
    }

    /// Install a loss filter; frames for which it returns true are dropped.
    pub fn set_loss(&self, filter: Option<LossFilter>) {
        *self
            .inner
            .loss
            .write()
            .unwrap_or_else(PoisonError::into_inner) = filter;
    }
}

impl MediumInner {
    fn stations_except(&self, source: MacAddr) -> Vec<Arc<MemoryLink>> {
        let mut stations = self.stations.lock().unwrap_or_else(PoisonError::into_inner);
        stations.retain(|_, weak| weak.strong_count() > 0);
        stations
            .iter()
            .filter(|(addr, _)| **addr != source)
            .filter_map(|(_, weak)| weak.upgrade())
            .collect()
    }

    fn station(&self, address: MacAddr) -> Option<Arc<MemoryLink>> {
        self.stations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&address)
            .and_then(Weak::upgrade)
    }

    fn is_lost(&self, source: MacAddr, destination: MacAddr, frame: &[u8]) -> bool {
        let loss = self.loss.read().unwrap_or_else(PoisonError::into_inner);
        loss.as_ref()
            .is_some_and(|filter| filter(source, destination, frame))
    }
}

/// One station attached to a [`MemoryMedium`].
pub struct MemoryLink {
    address: MacAddr,
    medium: Arc<MediumInner>,
    peers: PeerTable,
    receive_handler: RwLock<Option<ReceiveHandler>>,
    send_handler: RwLock<Option<SendHandler>>,
}

impl MemoryLink {
    /// Hand a raw frame to this station as if it arrived over the air.
    pub fn inject(&self, source: MacAddr, frame: &[u8]) {
        let handler = self
            .receive_handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match handler {
            Some(handler) => handler(source, frame),
            None => tracing::trace!(station = %self.address, "no receive handler, frame dropped"),
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

impl Link for MemoryLink {
    fn address(&self) -> MacAddr {
        self.address
    }

    fn send(&self, destination: MacAddr, frame: &[u8]) -> Result<()> {
        if frame.len() > LINK_MTU {
            return Err(LinkError::FrameTooLarge {
                size: frame.len(),
                max: LINK_MTU,
            });
        }
        if !self.peers.contains(destination) {
            return Err(LinkError::PeerNotFound(destination));
        }

        let status = if destination.is_broadcast() {
            for station in self.medium.stations_except(self.address) {
                if !self.medium.is_lost(self.address, station.address, frame) {
                    station.inject(self.address, frame);
                }
            }
            SendStatus::Success
        } else {
            match self.medium.station(destination) {
                Some(station) if !self.medium.is_lost(self.address, destination, frame) => {
                    station.inject(self.address, frame);
                    SendStatus::Success
                }
                _ => SendStatus::Failure,
            }
        };

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

impl std::fmt::Debug for MemoryLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLink")
            .field("address", &self.address)
            .field("peers", &self.peers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::addr::BROADCAST;

    type Inbox = Arc<Mutex<Vec<(MacAddr, Vec<u8>)>>>;

    fn recording(link: &MemoryLink) -> Inbox {
        let inbox: Inbox = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&inbox);
        link.register_receive_handler(Arc::new(move |src: MacAddr, data: &[u8]| {
            sink.lock().unwrap().push((src, data.to_vec()));
        }));
        inbox
    }

    fn addr(last: u8) -> MacAddr {
        MacAddr::new([0x02, 0, 0, 0, 0, last])
    }

    #[test]
    fn unicast_requires_peer_entry() {
        let medium = MemoryMedium::new();
        let a = medium.attach(addr(1));
        let _b = medium.attach(addr(2));

        let err = a.send(addr(2), b"hi").unwrap_err();
        assert!(matches!(err, LinkError::PeerNotFound(_)));
    }

    #[test]
    fn unicast_delivers_only_to_destination() {
        let medium = MemoryMedium::new();
        let a = medium.attach(addr(1));
        let b = medium.attach(addr(2));
        let c = medium.attach(addr(3));
        let inbox_b = recording(&b);
        let inbox_c = recording(&c);

        a.add_peer(addr(2)).unwrap();
        a.send(addr(2), b"hello").unwrap();

        assert_eq!(inbox_b.lock().unwrap().as_slice(), &[(addr(1), b"hello".to_vec())]);
        assert!(inbox_c.lock().unwrap().is_empty());
    }

    #[test]
    fn broadcast_reaches_everyone_but_sender() {
        let medium = MemoryMedium::new();
        let a = medium.attach(addr(1));
        let b = medium.attach(addr(2));
        let c = medium.attach(addr(3));
        let inbox_a = recording(&a);
        let inbox_b = recording(&b);
        let inbox_c = recording(&c);

        a.add_peer(BROADCAST).unwrap();
        a.send(BROADCAST, b"all").unwrap();

        assert!(inbox_a.lock().unwrap().is_empty());
        assert_eq!(inbox_b.lock().unwrap().len(), 1);
        assert_eq!(inbox_c.lock().unwrap().len(), 1);
    }

    #[test]
    fn send_status_reports_missing_station() {
        let medium = MemoryMedium::new();
        let a = medium.attach(addr(1));
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&statuses);
        a.register_send_handler(Arc::new(move |dst: MacAddr, status: SendStatus| {
            sink.lock().unwrap().push((dst, status));
        }));

        a.add_peer(addr(9)).unwrap();
        a.send(addr(9), b"void").unwrap();

        assert_eq!(
            statuses.lock().unwrap().as_slice(),
            &[(addr(9), SendStatus::Failure)]
        );
    }

    #[test]
    fn loss_filter_drops_frames() {
        let medium = MemoryMedium::new();
        let a = medium.attach(addr(1));
        let b = medium.attach(addr(2));
        let inbox = recording(&b);
        medium.set_loss(Some(Arc::new(|_: MacAddr, _: MacAddr, frame: &[u8]| frame == b"drop")));

        a.add_peer(addr(2)).unwrap();
        a.send(addr(2), b"drop").unwrap();
        a.send(addr(2), b"keep").unwrap();

        assert_eq!(inbox.lock().unwrap().as_slice(), &[(addr(1), b"keep".to_vec())]);
    }

    #[test]
    fn oversized_frame_rejected() {
        let medium = MemoryMedium::new();
        let a = medium.attach(addr(1));
        a.add_peer(BROADCAST).unwrap();
        let frame = vec![0u8; LINK_MTU + 1];
        assert!(matches!(
            a.send(BROADCAST, &frame),
            Err(LinkError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn dropped_station_is_forgotten() {
        let medium = MemoryMedium::new();
        let a = medium.attach(addr(1));
        let b = medium.attach(addr(2));
        drop(b);

        a.add_peer(addr(2)).unwrap();
        assert!(medium.inner.station(addr(2)).is_none());
        a.send(addr(2), b"gone").unwrap();
    }
}
