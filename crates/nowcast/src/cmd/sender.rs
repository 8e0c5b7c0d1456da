use std::time::Duration;

use nowcast_peer::{NodeConfig, SenderNode};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::cmd::{parse_duration, runtime, SenderArgs};
use crate::exit::{node_error, CliResult, SUCCESS};
use crate::output::{print_message, print_reports, NodeReport, OutputFormat};

pub fn run(args: SenderArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.node.resolve()?;
    let interval = parse_duration(&args.interval)?;
    runtime()?.block_on(serve(args, config, interval, format))
}

async fn serve(
    args: SenderArgs,
    config: NodeConfig,
    interval: Duration,
    format: OutputFormat,
) -> CliResult<i32> {
    let link = args.link.bind_link()?;
    let mut node =
        SenderNode::start(link.clone(), config).map_err(|err| node_error("start failed", err))?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut patterns = args.patterns.iter().cycle();
    let mut pending_brightness = args.brightness;
    let mut sent = 0usize;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupted");
                break;
            }
            _ = ticker.tick(), if pending_brightness.is_some() || !args.patterns.is_empty() => {
                // Brightness is retried until at least one receiver got it.
                if let Some(level) = pending_brightness {
                    match node.send_brightness(level).await {
                        Ok(0) => {}
                        Ok(receivers) => {
                            info!(level, receivers, "brightness sent");
                            pending_brightness = None;
                        }
                        Err(err) => warn!(level, error = %err, "brightness send failed"),
                    }
                }

                let Some(name) = patterns.next() else {
                    continue;
                };
                match node.send_pattern(name.as_str()).await {
                    Ok(0) => {}
                    Ok(receivers) => {
                        info!(pattern = %name, receivers, "pattern sent");
                        sent += 1;
                        if args.count.is_some_and(|count| sent >= count) {
                            break;
                        }
                    }
                    Err(err) => warn!(pattern = %name, error = %err, "pattern send failed"),
                }
            }
            message = node.recv() => match message {
                Some(message) => print_message(&message, format),
                None => break,
            },
        }
    }

    let report = NodeReport {
        role: "sender",
        address: node.address().to_string(),
        state: None,
        peers: node.peers().len(),
        messages: sent as u64,
        stats: node.stats(),
    };
    node.shutdown().await;
    link.shutdown();
    print_reports(&[report], format);

    Ok(SUCCESS)
}
