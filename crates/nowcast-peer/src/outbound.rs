//! Outbound pipeline: producers, bounded queue, link send worker.
//!
//! Producers encode their frame (taking the destination's next sequence
//! number) and wait a bounded time for queue space. A single worker hands
//! frames to the link.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use nowcast_frame::{encode_payload, FrameConfig, Payload};
use nowcast_link::{Link, MacAddr, SendHandler, SendStatus, BROADCAST};
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::sequence::SendSequencer;
use crate::stats::PipelineStats;

/// An encoded frame waiting for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub destination: MacAddr,
    pub frame: Bytes,
    /// Send even when no peer is admitted.
    pub unconditional: bool,
}

/// Producer side of the outbound queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::Sender<OutboundRequest>,
    sequencer: Arc<SendSequencer>,
    frame: FrameConfig,
    capacity: usize,
    submit_timeout: Duration,
}

/// Create the outbound queue for a node.
pub fn channel(config: &NodeConfig) -> (Outbound, mpsc::Receiver<OutboundRequest>) {
    let (tx, rx) = mpsc::channel(config.queue_capacity);
    let outbound = Outbound {
        tx,
        sequencer: Arc::new(SendSequencer::new(config.sequence_space())),
        frame: config.frame,
        capacity: config.queue_capacity,
        submit_timeout: config.submit_timeout,
    };
    (outbound, rx)
}

impl Outbound {
    /// Enqueue a request, waiting at most the submit timeout for space.
    pub async fn submit(&self, request: OutboundRequest) -> Result<()> {
        match self.tx.send_timeout(request, self.submit_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(request)) => {
                warn!(
                    peer = %request.destination,
                    capacity = self.capacity,
                    "outbound queue full, giving up"
                );
                Err(NodeError::QueueFull {
                    capacity: self.capacity,
                    waited: self.submit_timeout,
                })
            }
            Err(SendTimeoutError::Closed(_)) => Err(NodeError::Stopped),
        }
    }

    /// Encode `payload` for `destination` and enqueue it.
    ///
    /// Returns the sequence number the frame carries.
    pub async fn send_payload(&self, destination: MacAddr, payload: &Payload) -> Result<u16> {
        self.enqueue(destination, payload, false).await
    }

    /// Encode `payload` for the broadcast address and enqueue it unconditionally.
    pub async fn broadcast_payload(&self, payload: &Payload) -> Result<u16> {
        self.enqueue(BROADCAST, payload, true).await
    }

    async fn enqueue(
        &self,
        destination: MacAddr,
        payload: &Payload,
        unconditional: bool,
    ) -> Result<u16> {
        let sequence = self.sequencer.next_sequence(destination);
        let frame = encode_payload(&self.frame, sequence, payload)?;
        self.submit(OutboundRequest {
            destination,
            frame,
            unconditional,
        })
        .await?;
        trace!(
            peer = %destination,
            seq = sequence,
            payload_type = %payload.payload_type(),
            "frame queued"
        );
        Ok(sequence)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Single consumer of the outbound queue.
pub struct OutboundWorker {
    rx: mpsc::Receiver<OutboundRequest>,
    link: Arc<dyn Link>,
    stats: Arc<PipelineStats>,
}

impl OutboundWorker {
    pub fn new(
        rx: mpsc::Receiver<OutboundRequest>,
        link: Arc<dyn Link>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self { rx, link, stats }
    }

    /// Transmit requests until cancelled or every producer is gone.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let request = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                request = self.rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };
            self.transmit(request);
        }
        debug!("outbound worker stopped");
    }

    fn transmit(&self, request: OutboundRequest) {
        if !request.unconditional && self.link.peer_count() == 0 {
            self.stats.record_skipped_no_peer();
            warn!(peer = %request.destination, "no peers admitted, discarding outbound frame");
            return;
        }

        match self.link.send(request.destination, &request.frame) {
            Ok(()) => self.stats.record_sent(),
            Err(err) => {
                self.stats.record_send_failure();
                warn!(peer = %request.destination, error = %err, "link send failed");
            }
        }
    }
}

/// Send-completion callback that logs and counts failed transmissions.
pub fn send_handler(stats: Arc<PipelineStats>) -> SendHandler {
    Arc::new(move |destination: MacAddr, status: SendStatus| match status {
        SendStatus::Success => trace!(peer = %destination, "send completed"),
        SendStatus::Failure => {
            stats.record_send_failure();
            warn!(peer = %destination, "send completion reported failure");
        }
    })
}
