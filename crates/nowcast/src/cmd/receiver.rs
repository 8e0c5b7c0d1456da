use nowcast_peer::{NodeConfig, ReceiverNode};
use tracing::info;

use crate::cmd::{runtime, ReceiverArgs};
use crate::exit::{node_error, CliResult, SUCCESS};
use crate::output::{print_message, print_reports, NodeReport, OutputFormat};

pub fn run(args: ReceiverArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config = args.node.resolve()?;
    if args.no_implicit_registration {
        config = config.with_implicit_registration(false);
    }
    runtime()?.block_on(serve(args, config, format))
}

async fn serve(args: ReceiverArgs, config: NodeConfig, format: OutputFormat) -> CliResult<i32> {
    let link = args.link.bind_link()?;
    let mut node =
        ReceiverNode::start(link.clone(), config).map_err(|err| node_error("start failed", err))?;
    let mut state = node.subscribe();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut received = 0usize;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupted");
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                match node.registered_with() {
                    Some(sender) => info!(state = %current, %sender, "registration state changed"),
                    None => info!(state = %current, "registration state changed"),
                }
            }
            message = node.recv() => match message {
                Some(message) => {
                    print_message(&message, format);
                    received += 1;
                    if args.count.is_some_and(|count| received >= count) {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    let report = NodeReport {
        role: "receiver",
        address: node.address().to_string(),
        state: Some(node.state().to_string()),
        peers: usize::from(node.registered_with().is_some()),
        messages: received as u64,
        stats: node.stats(),
    };
    node.shutdown().await;
    link.shutdown();
    print_reports(&[report], format);

    Ok(SUCCESS)
}
