pub mod address;
pub mod compute_node;
pub mod membership;
pub mod message;
pub mod meta_server;
pub mod node;

pub use address::{resolve_meta_server_address, ConfigurationError, NodeAddress};
pub use compute_node::{ComputeGraphNode, ComputeNodeSettings};
pub use membership::{MembershipError, MembershipRecord, MembershipTable, NodeState};
pub use meta_server::{MetaServerNode, MetaServerSettings, TopologyState};
pub use node::{InitError, TopologyNode};

#[cfg(test)]
mod test {
    use tracing::Level;

    use topology_net::ext::init_logger;

    #[ctor::ctor]
    fn init() {
        init_logger(Level::DEBUG)
    }
}
