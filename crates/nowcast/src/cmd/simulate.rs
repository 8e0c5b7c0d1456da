use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nowcast_link::memory::LossFilter;
use nowcast_link::{MacAddr, MemoryMedium, DEFAULT_MAX_PEERS};
use nowcast_peer::{NodeConfig, ReceiverNode, SenderNode};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cmd::{parse_duration, runtime, SimulateArgs};
use crate::exit::{node_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};
use crate::output::{print_reports, NodeReport, OutputFormat};

const SENDER: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);

fn receiver_address(index: u8) -> MacAddr {
    MacAddr([0x02, 0x00, 0x00, 0x00, 0x01, index])
}

struct Plan {
    receivers: u8,
    duration: Duration,
    interval: Duration,
    patterns: Vec<String>,
    drop_every: Option<u64>,
}

pub fn run(args: SimulateArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config = args.node.resolve()?;
    if args.no_implicit_registration {
        config = config.with_implicit_registration(false);
    }

    let receivers = u8::try_from(args.receivers)
        .ok()
        .filter(|n| (1..=DEFAULT_MAX_PEERS).contains(&usize::from(*n)))
        .ok_or_else(|| {
            CliError::new(
                USAGE,
                format!("--receivers must be between 1 and {DEFAULT_MAX_PEERS}"),
            )
        })?;
    if args.drop_every == Some(0) {
        return Err(CliError::new(USAGE, "--drop-every must be greater than zero"));
    }

    let plan = Plan {
        receivers,
        duration: parse_duration(&args.duration)?,
        interval: parse_duration(&args.interval)?,
        patterns: args.patterns,
        drop_every: args.drop_every,
    };
    runtime()?.block_on(simulate(plan, config, format))
}

/// Drops every `n`th frame crossing the medium.
fn periodic_loss(n: u64) -> LossFilter {
    let counter = AtomicU64::new(0);
    Arc::new(move |source: MacAddr, destination: MacAddr, _: &[u8]| {
        let lost = (counter.fetch_add(1, Ordering::Relaxed) + 1) % n == 0;
        if lost {
            debug!(%source, %destination, "frame lost");
        }
        lost
    })
}

async fn simulate(plan: Plan, config: NodeConfig, format: OutputFormat) -> CliResult<i32> {
    let medium = MemoryMedium::new();
    if let Some(n) = plan.drop_every {
        medium.set_loss(Some(periodic_loss(n)));
    }

    let sender = SenderNode::start(medium.attach(SENDER), config.clone())
        .map_err(|err| node_error("sender start failed", err))?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut tasks = Vec::with_capacity(usize::from(plan.receivers));
    for index in 1..=plan.receivers {
        let node = ReceiverNode::start(medium.attach(receiver_address(index)), config.clone())
            .map_err(|err| node_error("receiver start failed", err))?;
        tasks.push(tokio::spawn(drain(node, stop_rx.clone())));
    }
    info!(
        receivers = plan.receivers,
        duration = ?plan.duration,
        "simulation started"
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let deadline = tokio::time::sleep_until(Instant::now() + plan.duration);
    tokio::pin!(deadline);

    let mut ticker = tokio::time::interval(plan.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut patterns = plan.patterns.iter().cycle();
    let mut rounds = 0u64;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupted");
                break;
            }
            _ = &mut deadline => break,
            _ = ticker.tick() => {
                let Some(name) = patterns.next() else {
                    continue;
                };
                match sender.send_pattern(name.as_str()).await {
                    Ok(0) => {}
                    Ok(receivers) => {
                        rounds += 1;
                        debug!(pattern = %name, receivers, "pattern sent");
                    }
                    Err(err) => warn!(pattern = %name, error = %err, "pattern send failed"),
                }
            }
        }
    }

    let _ = stop_tx.send(true);
    let mut reports = vec![NodeReport {
        role: "sender",
        address: sender.address().to_string(),
        state: None,
        peers: sender.peers().len(),
        messages: rounds,
        stats: sender.stats(),
    }];
    let mut receivers = Vec::with_capacity(tasks.len());
    for task in tasks {
        let (node, messages) = join(task).await?;
        reports.push(NodeReport {
            role: "receiver",
            address: node.address().to_string(),
            state: Some(node.state().to_string()),
            peers: usize::from(node.registered_with().is_some()),
            messages,
            stats: node.stats(),
        });
        receivers.push(node);
    }

    for node in receivers {
        node.shutdown().await;
    }
    sender.shutdown().await;
    print_reports(&reports, format);

    Ok(SUCCESS)
}

/// Count application messages until told to stop.
async fn drain(mut node: ReceiverNode, mut stop: watch::Receiver<bool>) -> (ReceiverNode, u64) {
    let mut messages = 0u64;
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            message = node.recv() => match message {
                Some(_) => messages += 1,
                None => break,
            },
        }
    }
    (node, messages)
}

async fn join(task: JoinHandle<(ReceiverNode, u64)>) -> CliResult<(ReceiverNode, u64)> {
    task.await
        .map_err(|err| CliError::new(INTERNAL, format!("receiver task failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn periodic_loss_drops_every_nth_frame() {
        let filter = periodic_loss(3);
        let lost: Vec<bool> = (0..6)
            .map(|_| filter(SENDER, receiver_address(1), &[]))
            .collect();
        assert_eq!(lost, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn receiver_addresses_are_distinct_from_sender() {
        assert_ne!(receiver_address(1), SENDER);
        assert_ne!(receiver_address(1), receiver_address(2));
    }
}
