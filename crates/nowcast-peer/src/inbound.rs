//! Inbound pipeline: link callback, bounded queue, decode worker.
//!
//! ```text
//! link callback ──try_send──▶ [queue] ──▶ worker: codec ▶ payload ▶ sequence ▶ dispatch
//! ```
//!
//! The callback only copies and enqueues. When the queue is full the newest
//! envelope is dropped and counted; the callback never waits.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use nowcast_frame::{decode_frame, decode_payload, FrameConfig, FrameError, Payload};
use nowcast_link::{MacAddr, ReceiveHandler};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::SequenceError;
use crate::sequence::SequenceTracker;
use crate::stats::PipelineStats;

/// A received frame and its source, owned by the pipeline until decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub source: MacAddr,
    pub data: Bytes,
}

/// How a data frame reached this station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Broadcast,
    Unicast,
}

impl DataKind {
    /// Classify by source address.
    pub fn classify(source: MacAddr) -> Self {
        if source.is_broadcast() {
            DataKind::Broadcast
        } else {
            DataKind::Unicast
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataKind::Broadcast => f.write_str("broadcast"),
            DataKind::Unicast => f.write_str("unicast"),
        }
    }
}

/// A frame that passed every inbound gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub source: MacAddr,
    pub sequence: u16,
    pub kind: DataKind,
    pub payload: Payload,
}

/// Application-level data handed to the node's owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppMessage {
    pub source: MacAddr,
    pub kind: DataKind,
    pub payload: Payload,
}

/// Why an envelope was discarded.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DiscardReason {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Sequence(#[from] SequenceError),
}

/// Routes accepted messages to role-specific behaviour.
pub trait Dispatch: Send + Sync + 'static {
    fn dispatch(&self, message: InboundMessage) -> impl Future<Output = ()> + Send;
}

/// Producer side of the inbound queue, used from the link callback.
#[derive(Debug, Clone)]
pub struct InboundHandle {
    tx: mpsc::Sender<Envelope>,
    stats: Arc<PipelineStats>,
}

/// Create the inbound queue.
pub fn channel(
    capacity: usize,
    stats: Arc<PipelineStats>,
) -> (InboundHandle, mpsc::Receiver<Envelope>) {
    let (tx, rx) = mpsc::channel(capacity);
    (InboundHandle { tx, stats }, rx)
}

impl InboundHandle {
    /// Copy a received frame into the queue without waiting.
    ///
    /// Returns false if the envelope was dropped.
    pub fn deliver(&self, source: MacAddr, data: &[u8]) -> bool {
        self.stats.record_received();
        let envelope = Envelope {
            source,
            data: Bytes::copy_from_slice(data),
        };
        match self.tx.try_send(envelope) {
            Ok(()) => true,
            Err(TrySendError::Full(envelope)) => {
                self.stats.record_overflow();
                warn!(
                    peer = %envelope.source,
                    len = envelope.data.len(),
                    overflow = self.stats.overflow(),
                    "inbound queue full, dropping frame"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                trace!(peer = %source, "inbound pipeline stopped, dropping frame");
                false
            }
        }
    }

    /// Wrap this handle as a link receive callback.
    pub fn receive_handler(&self) -> ReceiveHandler {
        let handle = self.clone();
        Arc::new(move |source: MacAddr, data: &[u8]| {
            handle.deliver(source, data);
        })
    }
}

/// Run one envelope through the decode and sequence gates.
///
/// The payload is decoded before the sequence check, so a frame with a
/// malformed or unknown payload never advances the peer's sequence state.
pub fn process(
    config: &FrameConfig,
    tracker: &SequenceTracker,
    envelope: &Envelope,
) -> Result<InboundMessage, DiscardReason> {
    let frame = decode_frame(config, &envelope.data)?;
    let payload = decode_payload(frame.payload_type(), frame.payload)?;
    tracker.accept(envelope.source, frame.sequence())?;
    Ok(InboundMessage {
        source: envelope.source,
        sequence: frame.sequence(),
        kind: DataKind::classify(envelope.source),
        payload,
    })
}

/// Single consumer of the inbound queue.
pub struct InboundWorker<D> {
    rx: mpsc::Receiver<Envelope>,
    frame: FrameConfig,
    tracker: Arc<SequenceTracker>,
    stats: Arc<PipelineStats>,
    dispatcher: D,
}

impl<D: Dispatch> InboundWorker<D> {
    pub fn new(
        rx: mpsc::Receiver<Envelope>,
        frame: FrameConfig,
        tracker: Arc<SequenceTracker>,
        stats: Arc<PipelineStats>,
        dispatcher: D,
    ) -> Self {
        Self {
            rx,
            frame,
            tracker,
            stats,
            dispatcher,
        }
    }

    /// Process envelopes until cancelled or every producer is gone.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let envelope = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                envelope = self.rx.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
            };
            self.handle(envelope).await;
        }
        debug!("inbound worker stopped");
    }

    async fn handle(&self, envelope: Envelope) {
        match process(&self.frame, &self.tracker, &envelope) {
            Ok(message) => {
                trace!(
                    peer = %message.source,
                    seq = message.sequence,
                    payload_type = %message.payload.payload_type(),
                    "frame accepted"
                );
                self.dispatcher.dispatch(message).await;
                self.stats.record_dispatched();
            }
            Err(DiscardReason::Frame(err)) => {
                self.stats.record_decode_discard();
                warn!(
                    peer = %envelope.source,
                    len = envelope.data.len(),
                    error = %err,
                    "discarding undecodable frame"
                );
            }
            Err(DiscardReason::Sequence(err)) => {
                self.stats.record_sequence_discard();
                debug!(peer = %envelope.source, error = %err, "discarding frame");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use nowcast_frame::{encode_frame, encode_payload, PayloadType};
    use nowcast_link::BROADCAST;

    use super::*;

    const PEER: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 7]);

    fn envelope(seq: u16, payload: &Payload) -> Envelope {
        Envelope {
            source: PEER,
            data: encode_payload(&FrameConfig::default(), seq, payload).unwrap(),
        }
    }

    struct Collect(mpsc::UnboundedSender<InboundMessage>);

    impl Dispatch for Collect {
        async fn dispatch(&self, message: InboundMessage) {
            let _ = self.0.send(message);
        }
    }

    #[test]
    fn process_accepts_valid_frame() {
        let tracker = SequenceTracker::default();
        let message = process(
            &FrameConfig::default(),
            &tracker,
            &envelope(3, &Payload::brightness(128)),
        )
        .unwrap();

        assert_eq!(message.sequence, 3);
        assert_eq!(message.kind, DataKind::Unicast);
        assert_eq!(message.payload, Payload::brightness(128));
        assert_eq!(tracker.last(PEER), Some(3));
    }

    #[test]
    fn process_rejects_corruption_before_sequence() {
        let tracker = SequenceTracker::default();
        let mut bad = envelope(3, &Payload::pattern("fire")).data.to_vec();
        bad[1] ^= 0x40;
        let bad = Envelope {
            source: PEER,
            data: Bytes::from(bad),
        };

        let err = process(&FrameConfig::default(), &tracker, &bad).unwrap_err();
        assert!(matches!(
            err,
            DiscardReason::Frame(FrameError::ChecksumMismatch { .. })
        ));
        assert_eq!(tracker.last(PEER), None);
    }

    #[test]
    fn unknown_payload_type_leaves_sequence_state_alone() {
        let config = FrameConfig::default();
        let tracker = SequenceTracker::default();
        tracker.accept(PEER, 4).unwrap();

        let mut buf = bytes::BytesMut::new();
        encode_frame(&config, 9, 0xFF, &[], &mut buf).unwrap();
        let unknown = Envelope {
            source: PEER,
            data: buf.freeze(),
        };

        assert_eq!(
            process(&config, &tracker, &unknown),
            Err(DiscardReason::Frame(FrameError::UnknownPayloadType(0xFF)))
        );
        assert_eq!(tracker.last(PEER), Some(4));
    }

    #[test]
    fn process_rejects_stale_sequence() {
        let tracker = SequenceTracker::default();
        let config = FrameConfig::default();
        process(&config, &tracker, &envelope(5, &Payload::Keepalive)).unwrap();

        let err = process(&config, &tracker, &envelope(3, &Payload::Keepalive)).unwrap_err();
        assert!(matches!(err, DiscardReason::Sequence(_)));
    }

    #[test]
    fn classify_uses_broadcast_source() {
        assert_eq!(DataKind::classify(BROADCAST), DataKind::Broadcast);
        assert_eq!(DataKind::classify(PEER), DataKind::Unicast);
        assert_eq!(DataKind::Unicast.to_string(), "unicast");
    }

    #[test]
    fn full_queue_drops_newest_and_counts_overflow() {
        let stats = Arc::new(PipelineStats::default());
        let (handle, mut rx) = channel(2, Arc::clone(&stats));

        assert!(handle.deliver(PEER, b"one"));
        assert!(handle.deliver(PEER, b"two"));
        assert!(!handle.deliver(PEER, b"three"));

        assert_eq!(stats.overflow(), 1);
        assert_eq!(stats.snapshot().received, 3);
        assert_eq!(rx.try_recv().unwrap().data, Bytes::from_static(b"one"));
        assert_eq!(rx.try_recv().unwrap().data, Bytes::from_static(b"two"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_queue_is_not_overflow() {
        let stats = Arc::new(PipelineStats::default());
        let (handle, rx) = channel(1, Arc::clone(&stats));
        drop(rx);

        assert!(!handle.deliver(PEER, b"late"));
        assert_eq!(stats.overflow(), 0);
    }

    #[tokio::test]
    async fn worker_dispatches_in_order_and_counts_discards() {
        let stats = Arc::new(PipelineStats::default());
        let (handle, rx) = channel(8, Arc::clone(&stats));
        let (tx, mut out) = mpsc::unbounded_channel();
        let worker = InboundWorker::new(
            rx,
            FrameConfig::default(),
            Arc::new(SequenceTracker::default()),
            Arc::clone(&stats),
            Collect(tx),
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(worker.run(cancel.clone()));

        let receive = handle.receive_handler();
        let first = envelope(5, &Payload::pattern("a"));
        let stale = envelope(3, &Payload::pattern("b"));
        let last = envelope(6, &Payload::pattern("c"));
        receive(PEER, &first.data);
        receive(PEER, &stale.data);
        receive(PEER, &[0x01, 0x02]);
        receive(PEER, &last.data);

        let first = out.recv().await.unwrap();
        let second = out.recv().await.unwrap();
        assert_eq!(first.payload, Payload::pattern("a"));
        assert_eq!(second.payload, Payload::pattern("c"));
        assert_eq!(second.payload.payload_type(), PayloadType::ChangePattern);

        cancel.cancel();
        task.await.unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.dispatched, 2);
        assert_eq!(snapshot.sequence_discards, 1);
        assert_eq!(snapshot.decode_discards, 1);
    }
}
