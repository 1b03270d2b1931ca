use std::time::Duration;

use clap::Parser;
use tracing::error;

use topology_cluster::{ComputeGraphNode, ComputeNodeSettings, NodeAddress, TopologyNode};
use topology_net::ext::init_logger_with_filter;

#[derive(Parser, Debug)]
struct Args {
    #[arg(short, long)]
    node_id: String,
    /// Host this node advertises to the job.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// Port this node advertises to the job.
    #[arg(short, long)]
    port: u16,
    #[arg(long, default_value_t = 3)]
    heartbeat_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logger_with_filter("topology_net=info,topology_cluster=info");
    let settings = ComputeNodeSettings::builder()
        .node_id(args.node_id)
        .address(NodeAddress::new(args.host, args.port))
        .heartbeat_interval(Duration::from_secs(args.heartbeat_interval_secs))
        .build();
    let mut node = ComputeGraphNode::new(settings);
    if let Err(error) = node.initialize().await {
        error!("compute graph node failed to start: {:#}", anyhow::Error::new(error));
        std::process::exit(1);
    }
    tokio::signal::ctrl_c().await?;
    node.finalize().await?;
    Ok(())
}
