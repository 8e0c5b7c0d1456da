use std::sync::Arc;

use nowcast_frame::Payload;
use nowcast_link::{Link, MacAddr};
use tracing::{debug, info};

use crate::error::{AdmissionError, Result};
use crate::outbound::Outbound;

/// Result of handling one registration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// The peer was added and a `RegistrationSuccessful` reply was queued.
    Admitted,
    /// The peer was already in the table; nothing was sent.
    AlreadyAdmitted,
}

/// Sender-side handler for `RegisterRequest`.
#[derive(Clone)]
pub struct Admission {
    link: Arc<dyn Link>,
    outbound: Outbound,
}

impl Admission {
    pub fn new(link: Arc<dyn Link>, outbound: Outbound) -> Self {
        Self { link, outbound }
    }

    /// Admit `peer` and acknowledge it.
    ///
    /// Idempotent: a peer already in the table gets no second reply. A
    /// failed peer-table insert is not retried here; the receiver keeps
    /// broadcasting until it is admitted.
    pub async fn admit(&self, peer: MacAddr) -> Result<AdmissionOutcome> {
        if self.link.peer_exists(peer) {
            debug!(%peer, "peer already admitted");
            return Ok(AdmissionOutcome::AlreadyAdmitted);
        }

        self.link
            .add_peer(peer)
            .map_err(|source| AdmissionError::AddPeerFailed { peer, source })?;
        info!(%peer, peers = self.link.peer_count(), "peer admitted");
        debug!(table = ?self.link.peers(), "peer table");

        let seq = self
            .outbound
            .send_payload(peer, &Payload::RegistrationSuccessful)
            .await?;
        debug!(%peer, seq, "registration acknowledgement queued");
        Ok(AdmissionOutcome::Admitted)
    }
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admission")
            .field("station", &self.link.address())
            .field("peers", &self.link.peer_count())
            .finish()
    }
}
