use clap::Parser;
use tracing::error;

use topology_cluster::{MetaServerNode, MetaServerSettings, TopologyNode};
use topology_net::ext::init_logger_with_filter;

#[derive(Parser, Debug)]
struct Args {
    #[arg(short, long, default_value = "meta_server")]
    node_id: String,
    /// Number of compute graph nodes the job expects to register.
    #[arg(short, long)]
    expected_nodes: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logger_with_filter("topology_net=info,topology_cluster=info");
    let settings = MetaServerSettings::builder()
        .node_id(args.node_id)
        .expected_nodes(args.expected_nodes)
        .build();
    let mut node = MetaServerNode::new(settings);
    if let Err(error) = node.initialize().await {
        error!("meta server failed to start: {:#}", anyhow::Error::new(error));
        std::process::exit(1);
    }
    tokio::signal::ctrl_c().await?;
    node.finalize().await?;
    Ok(())
}
