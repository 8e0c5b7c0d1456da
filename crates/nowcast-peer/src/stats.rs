use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counters shared by a node's pipelines.
#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicU64,
    overflow: AtomicU64,
    decode_discards: AtomicU64,
    sequence_discards: AtomicU64,
    dispatched: AtomicU64,
    app_dropped: AtomicU64,
    sent: AtomicU64,
    send_failures: AtomicU64,
    skipped_no_peer: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub overflow: u64,
    pub decode_discards: u64,
    pub sequence_discards: u64,
    pub dispatched: u64,
    pub app_dropped: u64,
    pub sent: u64,
    pub send_failures: u64,
    pub skipped_no_peer: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl PipelineStats {
    pub fn record_received(&self) {
        bump(&self.received);
    }

    pub fn record_overflow(&self) {
        bump(&self.overflow);
    }

    pub fn record_decode_discard(&self) {
        bump(&self.decode_discards);
    }

    pub fn record_sequence_discard(&self) {
        bump(&self.sequence_discards);
    }

    pub fn record_dispatched(&self) {
        bump(&self.dispatched);
    }

    pub fn record_app_dropped(&self) {
        bump(&self.app_dropped);
    }

    pub fn record_sent(&self) {
        bump(&self.sent);
    }

    pub fn record_send_failure(&self) {
        bump(&self.send_failures);
    }

    pub fn record_skipped_no_peer(&self) {
        bump(&self.skipped_no_peer);
    }

    /// Inbound envelopes dropped because the queue was full.
    pub fn overflow(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            received: load(&self.received),
            overflow: load(&self.overflow),
            decode_discards: load(&self.decode_discards),
            sequence_discards: load(&self.sequence_discards),
            dispatched: load(&self.dispatched),
            app_dropped: load(&self.app_dropped),
            sent: load(&self.sent),
            send_failures: load(&self.send_failures),
            skipped_no_peer: load(&self.skipped_no_peer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = PipelineStats::default();
        stats.record_received();
        stats.record_received();
        stats.record_overflow();
        stats.record_sent();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.received, 2);
        assert_eq!(snapshot.overflow, 1);
        assert_eq!(snapshot.sent, 1);
        assert_eq!(snapshot.dispatched, 0);
        assert_eq!(stats.overflow(), 1);
    }

    #[test]
    fn snapshot_serializes_field_names() {
        let stats = PipelineStats::default();
        stats.record_skipped_no_peer();
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["skipped_no_peer"], 1);
        assert_eq!(json["overflow"], 0);
    }
}
