use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use topology_net::TransportError;

use crate::address::{ConfigurationError, NodeAddress};

/// Startup failure of a topology node. The variant identifies which step
/// failed so the process diagnostic can name it.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("failed to resolve meta server address from environment")]
    Config(#[from] ConfigurationError),
    #[error("failed to start topology transport")]
    Transport(#[from] TransportError),
    #[error("failed to resolve socket addr for {addr}")]
    Lookup {
        addr: NodeAddress,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to connect to meta server at {addr}")]
    Connect {
        addr: NodeAddress,
        #[source]
        source: std::io::Error,
    },
    #[error("register with meta server at {addr} failed")]
    Register {
        addr: NodeAddress,
        #[source]
        source: anyhow::Error,
    },
    #[error("no register ack from meta server at {addr} within {timeout:?}")]
    RegisterTimeout { addr: NodeAddress, timeout: Duration },
    #[error("meta server at {addr} rejected registration")]
    RegisterRejected { addr: NodeAddress },
}

/// Common lifecycle of the topology processes: the meta server and every
/// compute graph node. `initialize` resolves the meta server address from
/// the environment; failure is fatal to the calling process.
#[async_trait]
pub trait TopologyNode {
    fn node_id(&self) -> &str;

    async fn initialize(&mut self) -> Result<(), InitError>;

    /// Idempotent; the second call is a no-op.
    async fn finalize(&mut self) -> anyhow::Result<()>;
}
