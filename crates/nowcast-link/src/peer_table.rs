use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::addr::MacAddr;
use crate::error::{LinkError, Result};

/// Bounded peer table shared by the bundled link implementations.
#[derive(Debug)]
pub(crate) struct PeerTable {
    peers: Mutex<BTreeSet<MacAddr>>,
    max_peers: usize,
}

impl PeerTable {
    pub(crate) fn new(max_peers: usize) -> Self {
        Self {
            peers: Mutex::new(BTreeSet::new()),
            max_peers,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<MacAddr>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn add(&self, peer: MacAddr) -> Result<()> {
        let mut peers = self.lock();
        if peers.contains(&peer) {
            return Err(LinkError::PeerExists(peer));
        }
        if peers.len() >= self.max_peers {
            return Err(LinkError::PeerTableFull {
                max: self.max_peers,
            });
        }
        peers.insert(peer);
        Ok(())
    }

    pub(crate) fn remove(&self, peer: MacAddr) -> Result<()> {
        if self.lock().remove(&peer) {
            Ok(())
        } else {
            Err(LinkError::PeerNotFound(peer))
        }
    }

    pub(crate) fn contains(&self, peer: MacAddr) -> bool {
        self.lock().contains(&peer)
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn snapshot(&self) -> Vec<MacAddr> {
        self.lock().iter().copied().collect()
    }
}
