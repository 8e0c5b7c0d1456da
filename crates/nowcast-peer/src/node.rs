//! Sender and receiver role assembly.
//!
//! A node wires one link to its pipelines and background tasks:
//!
//! | Task               | Sender | Receiver |
//! |--------------------|--------|----------|
//! | inbound worker     | yes    | yes      |
//! | outbound worker    | yes    | yes      |
//! | keepalive emitter  | yes    |          |
//! | broadcaster        |        | yes      |
//! | liveness monitor   |        | yes      |
//!
//! Every task observes the node's cancellation token. Dropping a node
//! cancels its tasks; `shutdown` also waits for them to finish.

use std::future::Future;
use std::sync::Arc;

use nowcast_frame::Payload;
use nowcast_link::{Link, MacAddr};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::admission::Admission;
use crate::config::NodeConfig;
use crate::error::Result;
use crate::inbound::{
    self, AppMessage, DataKind, Dispatch, Envelope, InboundMessage, InboundWorker,
};
use crate::keepalive::{admitted_peers, run_keepalive_emitter};
use crate::outbound::{self, Outbound, OutboundWorker};
use crate::registration::{
    run_broadcaster, run_liveness_monitor, Registration, RegistrationState,
};
use crate::sequence::SequenceTracker;
use crate::stats::{PipelineStats, StatsSnapshot};

/// Bounded hand-off of application data to the node's owner.
#[derive(Debug, Clone)]
struct AppSink {
    tx: mpsc::Sender<AppMessage>,
    stats: Arc<PipelineStats>,
}

impl AppSink {
    fn deliver(&self, message: InboundMessage) {
        let app = AppMessage {
            source: message.source,
            kind: message.kind,
            payload: message.payload,
        };
        match self.tx.try_send(app) {
            Ok(()) => {}
            Err(TrySendError::Full(app)) => {
                self.stats.record_app_dropped();
                warn!(peer = %app.source, "application not draining, dropping message");
            }
            Err(TrySendError::Closed(app)) => {
                trace!(peer = %app.source, "application receiver gone");
            }
        }
    }
}

struct NodeCore {
    link: Arc<dyn Link>,
    config: NodeConfig,
    stats: Arc<PipelineStats>,
    outbound: Outbound,
    tracker: Arc<SequenceTracker>,
    app_rx: mpsc::Receiver<AppMessage>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeCore {
    /// Build the queues, install link callbacks and start the outbound worker.
    fn wire(
        link: Arc<dyn Link>,
        config: NodeConfig,
    ) -> Result<(Self, mpsc::Receiver<Envelope>, AppSink)> {
        config.validate()?;

        let stats = Arc::new(PipelineStats::default());
        let (inbound, inbound_rx) = inbound::channel(config.queue_capacity, Arc::clone(&stats));
        let (outbound, outbound_rx) = outbound::channel(&config);
        let (app_tx, app_rx) = mpsc::channel(config.app_queue_capacity);

        link.register_receive_handler(inbound.receive_handler());
        link.register_send_handler(outbound::send_handler(Arc::clone(&stats)));

        let mut core = Self {
            tracker: Arc::new(SequenceTracker::new(config.sequence_space())),
            link: Arc::clone(&link),
            config,
            stats: Arc::clone(&stats),
            outbound,
            app_rx,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        };
        let worker = OutboundWorker::new(outbound_rx, link, Arc::clone(&stats));
        core.spawn(worker.run(core.cancel.clone()));

        let sink = AppSink { tx: app_tx, stats };
        Ok((core, inbound_rx, sink))
    }

    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(tokio::spawn(task));
    }

    fn start_inbound<D: Dispatch>(&mut self, rx: mpsc::Receiver<Envelope>, dispatcher: D) {
        let worker = InboundWorker::new(
            rx,
            self.config.frame,
            Arc::clone(&self.tracker),
            Arc::clone(&self.stats),
            dispatcher,
        );
        self.spawn(worker.run(self.cancel.clone()));
    }

    async fn shutdown(&mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                error!(error = %err, "node task ended abnormally");
            }
        }
        info!(station = %self.link.address(), "node stopped");
    }
}

impl Drop for NodeCore {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct SenderDispatch {
    admission: Admission,
    app: AppSink,
}

impl Dispatch for SenderDispatch {
    async fn dispatch(&self, message: InboundMessage) {
        match message.payload {
            Payload::RegisterRequest if message.kind == DataKind::Broadcast => {
                warn!(peer = %message.source, "register request from broadcast address ignored");
            }
            Payload::RegisterRequest => {
                if let Err(err) = self.admission.admit(message.source).await {
                    error!(peer = %message.source, error = %err, "admission failed");
                }
            }
            Payload::ChangePattern { .. } | Payload::ChangeBrightness { .. } => {
                self.app.deliver(message);
            }
            Payload::RegistrationSuccessful | Payload::Keepalive => {
                debug!(
                    peer = %message.source,
                    payload_type = %message.payload.payload_type(),
                    "ignored by sender"
                );
            }
        }
    }
}

struct ReceiverDispatch {
    registration: Arc<Registration>,
    app: AppSink,
    implicit_registration: bool,
}

impl ReceiverDispatch {
    /// Promote an unregistered receiver on unicast traffic from a sender.
    fn register_implicitly(&self, message: &InboundMessage) -> bool {
        if !self.implicit_registration
            || message.kind != DataKind::Unicast
            || self.registration.is_registered()
        {
            return false;
        }
        let changed = self.registration.mark_registered(message.source, Instant::now());
        if changed {
            info!(
                sender = %message.source,
                payload_type = %message.payload.payload_type(),
                "registered implicitly by unicast traffic"
            );
        }
        changed
    }
}

impl Dispatch for ReceiverDispatch {
    async fn dispatch(&self, message: InboundMessage) {
        match message.payload {
            Payload::RegistrationSuccessful => {
                if self.registration.mark_registered(message.source, Instant::now()) {
                    info!(sender = %message.source, "registration acknowledged");
                }
            }
            Payload::Keepalive => {
                if self.register_implicitly(&message) {
                    return;
                }
                if self.registration.record_keepalive(message.source, Instant::now()) {
                    trace!(peer = %message.source, "keepalive");
                } else {
                    debug!(peer = %message.source, "keepalive from unregistered sender ignored");
                }
            }
            // Other receivers' requests; never proof of a sender.
            Payload::RegisterRequest => {
                debug!(peer = %message.source, "register request ignored by receiver");
            }
            Payload::ChangePattern { .. } | Payload::ChangeBrightness { .. } => {
                self.register_implicitly(&message);
                self.app.deliver(message);
            }
        }
    }
}

/// The sender role: admits receivers, emits keepalives, fans out data.
pub struct SenderNode {
    core: NodeCore,
}

impl SenderNode {
    /// Wire `link` and start the sender tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(link: Arc<dyn Link>, config: NodeConfig) -> Result<Self> {
        let (mut core, inbound_rx, app) = NodeCore::wire(link, config)?;

        let admission = Admission::new(Arc::clone(&core.link), core.outbound.clone());
        core.start_inbound(inbound_rx, SenderDispatch { admission, app });
        core.spawn(run_keepalive_emitter(
            Arc::clone(&core.link),
            core.outbound.clone(),
            core.config.keepalive_interval,
            core.cancel.clone(),
        ));

        info!(station = %core.link.address(), "sender started");
        Ok(Self { core })
    }

    pub fn address(&self) -> MacAddr {
        self.core.link.address()
    }

    /// Currently admitted receivers.
    pub fn peers(&self) -> Vec<MacAddr> {
        admitted_peers(self.core.link.as_ref())
    }

    /// Send `payload` to every admitted receiver, one unicast frame each.
    ///
    /// Returns the number of frames queued.
    pub async fn send(&self, payload: &Payload) -> Result<usize> {
        let peers = self.peers();
        if peers.is_empty() {
            self.core.stats.record_skipped_no_peer();
            warn!(payload_type = %payload.payload_type(), "no peers admitted, nothing sent");
            return Ok(0);
        }
        for peer in &peers {
            self.core.outbound.send_payload(*peer, payload).await?;
        }
        Ok(peers.len())
    }

    pub async fn send_pattern(&self, name: impl Into<String>) -> Result<usize> {
        self.send(&Payload::pattern(name)).await
    }

    pub async fn send_brightness(&self, level: u8) -> Result<usize> {
        self.send(&Payload::brightness(level)).await
    }

    /// Next application message received from a peer.
    pub async fn recv(&mut self) -> Option<AppMessage> {
        self.core.app_rx.recv().await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats.snapshot()
    }

    /// Cancel every task and wait for them to finish.
    pub async fn shutdown(mut self) {
        self.core.shutdown().await;
    }
}

impl std::fmt::Debug for SenderNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SenderNode")
            .field("address", &self.address())
            .field("peers", &self.peers())
            .finish()
    }
}

/// The receiver role: registers with a sender and tracks its liveness.
pub struct ReceiverNode {
    core: NodeCore,
    registration: Arc<Registration>,
}

impl ReceiverNode {
    /// Wire `link` and start the receiver tasks. Registration begins immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(link: Arc<dyn Link>, config: NodeConfig) -> Result<Self> {
        let (mut core, inbound_rx, app) = NodeCore::wire(link, config)?;
        let registration = Arc::new(Registration::new());

        core.start_inbound(
            inbound_rx,
            ReceiverDispatch {
                registration: Arc::clone(&registration),
                app,
                implicit_registration: core.config.implicit_registration,
            },
        );
        core.spawn(run_broadcaster(
            Arc::clone(&registration),
            Arc::clone(&core.link),
            core.outbound.clone(),
            core.config.registration_interval,
            core.cancel.clone(),
        ));
        core.spawn(run_liveness_monitor(
            Arc::clone(&registration),
            core.config.liveness_check_interval,
            core.config.keepalive_timeout,
            core.cancel.clone(),
        ));

        info!(station = %core.link.address(), "receiver started");
        Ok(Self { core, registration })
    }

    pub fn address(&self) -> MacAddr {
        self.core.link.address()
    }

    pub fn state(&self) -> RegistrationState {
        self.registration.state()
    }

    /// Sender that acknowledged the latest registration.
    pub fn registered_with(&self) -> Option<MacAddr> {
        self.registration.registered_with()
    }

    pub fn subscribe(&self) -> watch::Receiver<RegistrationState> {
        self.registration.subscribe()
    }

    /// Wait until the registration state equals `target`.
    pub async fn wait_for_state(&self, target: RegistrationState) {
        self.registration.wait_for(target).await;
    }

    /// Next application message from the sender.
    pub async fn recv(&mut self) -> Option<AppMessage> {
        self.core.app_rx.recv().await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats.snapshot()
    }

    /// Cancel every task and wait for them to finish.
    pub async fn shutdown(mut self) {
        self.core.shutdown().await;
    }
}

impl std::fmt::Debug for ReceiverNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiverNode")
            .field("address", &self.address())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use nowcast_link::MemoryMedium;

    use super::*;
    use crate::error::NodeError;

    #[tokio::test]
    async fn start_rejects_invalid_config() {
        let medium = MemoryMedium::new();
        let link = medium.attach(MacAddr([0x02, 0, 0, 0, 0, 1]));
        let config = NodeConfig::default().with_queue_capacity(0);
        let err = SenderNode::start(link, config).unwrap_err();
        assert!(matches!(err, NodeError::InvalidConfig(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn sender_without_peers_sends_nothing() {
        let medium = MemoryMedium::new();
        let link = medium.attach(MacAddr([0x02, 0, 0, 0, 0, 1]));
        let sender = SenderNode::start(link, NodeConfig::default()).unwrap();

        assert_eq!(sender.send_pattern("solid").await.unwrap(), 0);
        assert_eq!(sender.stats().skipped_no_peer, 1);
        sender.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn receiver_starts_registering() {
        let medium = MemoryMedium::new();
        let link = medium.attach(MacAddr([0x02, 0, 0, 0, 0, 2]));
        let receiver = ReceiverNode::start(link.clone(), NodeConfig::default()).unwrap();

        receiver.wait_for_state(RegistrationState::Registering).await;
        assert_eq!(receiver.registered_with(), None);
        receiver.shutdown().await;
        assert!(link.peers().is_empty());
    }
}
