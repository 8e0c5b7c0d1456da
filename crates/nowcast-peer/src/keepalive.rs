use std::sync::Arc;
use std::time::Duration;

use nowcast_frame::Payload;
use nowcast_link::{Link, MacAddr};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::outbound::Outbound;

/// Peers in the link's table, excluding the broadcast entry.
pub fn admitted_peers(link: &dyn Link) -> Vec<MacAddr> {
    link.peers()
        .into_iter()
        .filter(|peer| !peer.is_broadcast())
        .collect()
}

/// Send a unicast `Keepalive` to every admitted peer once per period.
///
/// The first round goes out one full period after start.
pub async fn run_keepalive_emitter(
    link: Arc<dyn Link>,
    outbound: Outbound,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => emit(link.as_ref(), &outbound).await,
        }
    }
    debug!("keepalive emitter stopped");
}

async fn emit(link: &dyn Link, outbound: &Outbound) {
    let peers = admitted_peers(link);
    if peers.is_empty() {
        trace!("no peers admitted, keepalive skipped");
        return;
    }
    for peer in &peers {
        if let Err(err) = outbound.send_payload(*peer, &Payload::Keepalive).await {
            warn!(%peer, error = %err, "failed to queue keepalive");
        }
    }
    debug!(peers = peers.len(), "keepalive round queued");
}
