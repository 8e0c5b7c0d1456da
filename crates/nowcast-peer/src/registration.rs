//! Receiver-side registration state machine.
//!
//! ```text
//! Unregistered ──begin──▶ Registering ──RegistrationSuccessful──▶ Registered
//!       ▲                                                            │
//!       └──────────────── no keepalive within timeout ───────────────┘
//! ```
//!
//! The broadcaster task sends a `RegisterRequest` to the broadcast address
//! once per interval while not registered. The liveness monitor drops a
//! registered receiver back to `Unregistered` when keepalives stop, which
//! re-arms the broadcaster.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nowcast_frame::Payload;
use nowcast_link::{Link, MacAddr, BROADCAST};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::outbound::Outbound;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Registered,
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegistrationState::Unregistered => "unregistered",
            RegistrationState::Registering => "registering",
            RegistrationState::Registered => "registered",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
struct Liveness {
    last_keepalive: Option<Instant>,
    sender: Option<MacAddr>,
}

/// Registration state plus the keepalive timestamp.
#[derive(Debug)]
pub struct Registration {
    state: watch::Sender<RegistrationState>,
    liveness: Mutex<Liveness>,
}

impl Default for Registration {
    fn default() -> Self {
        Self::new()
    }
}

impl Registration {
    pub fn new() -> Self {
        let (state, _) = watch::channel(RegistrationState::Unregistered);
        Self {
            state,
            liveness: Mutex::new(Liveness::default()),
        }
    }

    fn liveness(&self) -> MutexGuard<'_, Liveness> {
        self.liveness.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> RegistrationState {
        *self.state.borrow()
    }

    pub fn is_registered(&self) -> bool {
        self.state() == RegistrationState::Registered
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<RegistrationState> {
        self.state.subscribe()
    }

    /// `Unregistered -> Registering`. Returns true on transition.
    pub fn begin(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == RegistrationState::Unregistered {
                *state = RegistrationState::Registering;
                true
            } else {
                false
            }
        })
    }

    /// Enter `Registered`, stamping the keepalive clock.
    ///
    /// Returns true if the state changed.
    pub fn mark_registered(&self, sender: MacAddr, now: Instant) -> bool {
        let mut liveness = self.liveness();
        liveness.last_keepalive = Some(now);
        liveness.sender = Some(sender);
        self.state.send_if_modified(|state| {
            if *state == RegistrationState::Registered {
                false
            } else {
                *state = RegistrationState::Registered;
                true
            }
        })
    }

    /// Record a keepalive from `source`. Does not change the state.
    ///
    /// Only the sender of the current registration refreshes the clock.
    /// Returns true if the clock was refreshed.
    pub fn record_keepalive(&self, source: MacAddr, now: Instant) -> bool {
        let mut liveness = self.liveness();
        if !self.is_registered() || liveness.sender != Some(source) {
            return false;
        }
        liveness.last_keepalive = Some(now);
        true
    }

    pub fn last_keepalive(&self) -> Option<Instant> {
        self.liveness().last_keepalive
    }

    /// Sender that acknowledged the latest registration.
    pub fn registered_with(&self) -> Option<MacAddr> {
        self.liveness().sender
    }

    /// Drop back to `Unregistered` if registered and silent for longer than `timeout`.
    ///
    /// Returns true on transition.
    pub fn check_liveness(&self, now: Instant, timeout: Duration) -> bool {
        // Held across the transition so a concurrent keepalive is either
        // seen here or lands after the demotion.
        let liveness = self.liveness();
        let expired = match liveness.last_keepalive {
            Some(last) => now.saturating_duration_since(last) > timeout,
            None => true,
        };
        expired
            && self.state.send_if_modified(|state| {
                if *state == RegistrationState::Registered {
                    *state = RegistrationState::Unregistered;
                    true
                } else {
                    false
                }
            })
    }

    /// Wait until the state equals `target`.
    pub async fn wait_for(&self, target: RegistrationState) {
        let mut state = self.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = wait_until(&mut state, |current| current == target).await;
    }
}

/// Periodically broadcast `RegisterRequest` while not registered.
pub async fn run_broadcaster(
    registration: Arc<Registration>,
    link: Arc<dyn Link>,
    outbound: Outbound,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut state = registration.subscribe();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            changed = wait_until(&mut state, |s| s != RegistrationState::Registered) => {
                if changed.is_err() {
                    break;
                }
            }
        }

        registration.begin();
        acquire_broadcast_peer(link.as_ref());
        info!(station = %link.address(), "registering, broadcasting register requests");

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let registered = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break false,
                _ = wait_until(&mut state, |s| s == RegistrationState::Registered) => break true,
                _ = ticker.tick() => {
                    match outbound.broadcast_payload(&Payload::RegisterRequest).await {
                        Ok(seq) => debug!(seq, "register request queued"),
                        Err(err) => warn!(error = %err, "failed to queue register request"),
                    }
                }
            }
        };

        release_broadcast_peer(link.as_ref());
        if !registered {
            break;
        }
        match registration.registered_with() {
            Some(sender) => info!(%sender, "registered, broadcast stopped"),
            None => info!("registered, broadcast stopped"),
        }
    }
    debug!("registration broadcaster stopped");
}

/// Check keepalive freshness once per period.
pub async fn run_liveness_monitor(
    registration: Arc<Registration>,
    period: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if registration.check_liveness(Instant::now(), timeout) {
                    warn!(
                        timeout_ms = timeout.as_millis() as u64,
                        "keepalive timeout, restarting registration"
                    );
                }
            }
        }
    }
    debug!("liveness monitor stopped");
}

async fn wait_until(
    state: &mut watch::Receiver<RegistrationState>,
    predicate: impl Fn(RegistrationState) -> bool,
) -> Result<(), watch::error::RecvError> {
    state.wait_for(|current| predicate(*current)).await.map(|_| ())
}

fn acquire_broadcast_peer(link: &dyn Link) {
    if link.peer_exists(BROADCAST) {
        debug!("broadcast peer already present");
        return;
    }
    match link.add_peer(BROADCAST) {
        Ok(()) => debug!("broadcast peer added"),
        Err(err) => error!(error = %err, "failed to add broadcast peer"),
    }
}

fn release_broadcast_peer(link: &dyn Link) {
    if !link.peer_exists(BROADCAST) {
        return;
    }
    match link.remove_peer(BROADCAST) {
        Ok(()) => debug!("broadcast peer removed"),
        Err(err) => error!(error = %err, "failed to remove broadcast peer"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use nowcast_frame::{decode_frame, FrameConfig, PayloadType};
    use nowcast_link::MemoryMedium;

    use super::*;
    use crate::config::NodeConfig;
    use crate::outbound::{self, OutboundWorker};
    use crate::stats::PipelineStats;

    const SENDER: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 1]);
    const RECEIVER: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 2]);

    #[test]
    fn transitions() {
        let registration = Registration::new();
        let t0 = Instant::now();
        assert_eq!(registration.state(), RegistrationState::Unregistered);

        assert!(registration.begin());
        assert!(!registration.begin());
        assert_eq!(registration.state(), RegistrationState::Registering);

        assert!(registration.mark_registered(SENDER, t0));
        assert!(!registration.mark_registered(SENDER, t0));
        assert_eq!(registration.registered_with(), Some(SENDER));
        assert_eq!(registration.last_keepalive(), Some(t0));
    }

    #[test]
    fn registration_grants_full_timeout_window() {
        let registration = Registration::new();
        let t0 = Instant::now();
        let timeout = Duration::from_secs(10);
        registration.mark_registered(SENDER, t0);

        assert!(!registration.check_liveness(t0 + Duration::from_secs(10), timeout));
        assert!(registration.check_liveness(t0 + Duration::from_secs(11), timeout));
        assert_eq!(registration.state(), RegistrationState::Unregistered);
    }

    #[test]
    fn keepalive_extends_registration() {
        let registration = Registration::new();
        let t0 = Instant::now();
        let timeout = Duration::from_secs(10);
        registration.mark_registered(SENDER, t0);
        assert!(registration.record_keepalive(SENDER, t0 + Duration::from_secs(8)));

        assert!(!registration.check_liveness(t0 + Duration::from_secs(15), timeout));
        assert!(registration.is_registered());
    }

    #[test]
    fn keepalive_alone_does_not_register() {
        let registration = Registration::new();
        let t0 = Instant::now();
        assert!(!registration.record_keepalive(SENDER, t0));
        assert_eq!(registration.state(), RegistrationState::Unregistered);
        assert_eq!(registration.last_keepalive(), None);
        assert!(!registration.check_liveness(t0 + Duration::from_secs(60), Duration::from_secs(1)));
    }

    #[test]
    fn keepalive_from_other_station_is_ignored() {
        let registration = Registration::new();
        let t0 = Instant::now();
        let timeout = Duration::from_secs(10);
        let stranger = MacAddr([0x02, 0, 0, 0, 0, 9]);
        registration.mark_registered(SENDER, t0);

        assert!(!registration.record_keepalive(stranger, t0 + Duration::from_secs(8)));
        assert_eq!(registration.last_keepalive(), Some(t0));
        assert!(registration.check_liveness(t0 + Duration::from_secs(11), timeout));
    }

    #[test]
    fn refreshed_keepalive_is_never_lost_to_a_concurrent_check() {
        let t0 = Instant::now();
        let timeout = Duration::from_secs(10);
        let now = t0 + Duration::from_secs(20);

        for _ in 0..500 {
            let registration = Registration::new();
            registration.mark_registered(SENDER, t0);
            let barrier = std::sync::Barrier::new(2);

            let refreshed = std::thread::scope(|scope| {
                scope.spawn(|| {
                    barrier.wait();
                    registration.check_liveness(now, timeout);
                });
                let keepalive = scope.spawn(|| {
                    barrier.wait();
                    registration.record_keepalive(SENDER, now)
                });
                keepalive.join().unwrap()
            });

            // A keepalive accepted while registered must keep the registration.
            if refreshed {
                assert!(registration.is_registered());
            }
        }
    }

    #[test]
    fn display_names() {
        assert_eq!(RegistrationState::Registering.to_string(), "registering");
        assert_eq!(
            serde_json::to_string(&RegistrationState::Unregistered).unwrap(),
            "\"unregistered\""
        );
    }

    #[tokio::test(start_paused = true)]
    async fn broadcaster_stops_on_registration_and_rearms_after_timeout() {
        let medium = MemoryMedium::new();
        let receiver = medium.attach(RECEIVER);
        let sender = medium.attach(SENDER);
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&requests);
        sender.register_receive_handler(Arc::new(move |_: MacAddr, data: &[u8]| {
            let frame = decode_frame(&FrameConfig::default(), data).unwrap();
            if frame.payload_type() == PayloadType::RegisterRequest as u8 {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        let config = NodeConfig::default();
        let stats = Arc::new(PipelineStats::default());
        let (outbound, rx) = outbound::channel(&config);
        let cancel = CancellationToken::new();
        let registration = Arc::new(Registration::new());
        let link: Arc<dyn Link> = receiver.clone();
        let tasks = vec![
            tokio::spawn(OutboundWorker::new(rx, Arc::clone(&link), stats).run(cancel.clone())),
            tokio::spawn(run_broadcaster(
                Arc::clone(&registration),
                Arc::clone(&link),
                outbound,
                config.registration_interval,
                cancel.clone(),
            )),
            tokio::spawn(run_liveness_monitor(
                Arc::clone(&registration),
                config.liveness_check_interval,
                config.keepalive_timeout,
                cancel.clone(),
            )),
        ];

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(registration.state(), RegistrationState::Registering);
        assert_eq!(requests.load(Ordering::SeqCst), 4);
        assert!(receiver.peer_exists(BROADCAST));

        registration.mark_registered(SENDER, Instant::now());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(requests.load(Ordering::SeqCst), 4);
        assert!(!receiver.peer_exists(BROADCAST));
        assert!(registration.is_registered());

        // No keepalives arrive: after the timeout the broadcast resumes.
        tokio::time::sleep(Duration::from_secs(8)).await;
        assert_eq!(registration.state(), RegistrationState::Registering);
        assert!(requests.load(Ordering::SeqCst) > 4);
        assert!(receiver.peer_exists(BROADCAST));

        cancel.cancel();
        for task in tasks {
            task.await.unwrap();
        }
        assert!(!receiver.peer_exists(BROADCAST));
    }
}
