use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use typed_builder::TypedBuilder;

use topology_net::ext::{decode_bytes, encode_bytes};
use topology_net::{Inbound, InboundHandler, Packet, TcpServer};

use crate::address::{resolve_meta_server_address, NodeAddress};
use crate::membership::{MembershipRecord, MembershipTable};
use crate::message::{HeartbeatAck, RegisterAck, TopologyMessage};
use crate::node::{InitError, TopologyNode};

#[derive(Debug, Clone, TypedBuilder)]
pub struct MetaServerSettings {
    #[builder(setter(into))]
    pub node_id: String,
    /// Number of compute graph nodes the job expects. `None` disables the
    /// topology readiness gate.
    #[builder(default)]
    pub expected_nodes: Option<usize>,
}

/// Readiness of the whole topology as seen by the meta server.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TopologyState {
    Initializing,
    Initialized,
}

/// The single rendezvous process of a job: accepts registrations and
/// heartbeats from compute graph nodes and holds the authoritative
/// membership table. It exclusively owns the transport server and the table;
/// the table is shared only with its own dispatcher.
pub struct MetaServerNode {
    settings: MetaServerSettings,
    table: Arc<MembershipTable>,
    server: Option<TcpServer>,
}

impl MetaServerNode {
    pub fn new(settings: MetaServerSettings) -> Self {
        Self {
            settings,
            table: Arc::new(MembershipTable::new()),
            server: None,
        }
    }

    /// Binds the transport at the given address and starts serving. Used by
    /// `TopologyNode::initialize` after env resolution, directly by tests.
    pub async fn initialize_with(&mut self, addr: NodeAddress) -> Result<(), InitError> {
        let socket_addr = addr.socket_addr().await.map_err(|source| InitError::Lookup {
            addr: addr.clone(),
            source,
        })?;
        let dispatcher = Arc::new(Dispatcher {
            table: self.table.clone(),
        });
        let server = TcpServer::listen(socket_addr, dispatcher).await?;
        info!(
            "meta server {} serving topology at {}",
            self.settings.node_id,
            server.local_addr()
        );
        self.server = Some(server);
        Ok(())
    }

    pub fn members(&self) -> Vec<MembershipRecord> {
        self.table.snapshot()
    }

    pub fn topology_state(&self) -> TopologyState {
        match self.settings.expected_nodes {
            Some(expected) if self.table.len() < expected => TopologyState::Initializing,
            _ => TopologyState::Initialized,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(|server| server.local_addr())
    }
}

#[async_trait]
impl TopologyNode for MetaServerNode {
    fn node_id(&self) -> &str {
        &self.settings.node_id
    }

    async fn initialize(&mut self) -> Result<(), InitError> {
        let addr = resolve_meta_server_address()?;
        self.initialize_with(addr).await
    }

    async fn finalize(&mut self) -> anyhow::Result<()> {
        if let Some(server) = self.server.take() {
            server.stop();
            self.table.clear();
            info!("meta server {} finalized", self.settings.node_id);
        }
        Ok(())
    }
}

/// Decodes each inbound packet once and routes it by kind. Per-message
/// failures are logged and isolated; nothing here can take the server down.
struct Dispatcher {
    table: Arc<MembershipTable>,
}

#[async_trait]
impl InboundHandler for Dispatcher {
    async fn on_message(&self, inbound: Inbound) {
        let message = match decode_bytes::<TopologyMessage>(&inbound.packet) {
            Ok(message) => message,
            Err(error) => {
                warn!("{} unrecognized message dropped {:?}", inbound.peer, error);
                return;
            }
        };
        match message {
            TopologyMessage::Register(register) => {
                let record = self.table.upsert(register.node_id, register.address);
                info!("node {} registered from {}", record.node_id, record.address);
                self.respond(
                    &inbound,
                    TopologyMessage::RegisterAck(RegisterAck { success: true }),
                )
                .await;
            }
            TopologyMessage::Heartbeat(heartbeat) => {
                let success = match self.table.record_heartbeat(&heartbeat.node_id) {
                    Ok(()) => true,
                    Err(error) => {
                        warn!("heartbeat from {} dropped: {}", inbound.peer, error);
                        false
                    }
                };
                self.respond(
                    &inbound,
                    TopologyMessage::HeartbeatAck(HeartbeatAck { success }),
                )
                .await;
            }
            other => {
                warn!("{} unexpected message {:?} dropped", inbound.peer, other);
            }
        }
    }
}

impl Dispatcher {
    async fn respond(&self, inbound: &Inbound, message: TopologyMessage) {
        match encode_bytes(&message) {
            Ok(bytes) => {
                if let Err(error) = inbound.respond(Packet::new(bytes)).await {
                    warn!("failed to ack {}: {}", inbound.peer, error);
                }
            }
            Err(error) => {
                warn!("failed to encode ack for {}: {:?}", inbound.peer, error);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpStream;
    use tokio_util::codec::Framed;

    use topology_net::ext::{decode_bytes, encode_bytes};
    use topology_net::{Packet, PacketCodec};

    use crate::address::NodeAddress;
    use crate::membership::NodeState;
    use crate::message::{Heartbeat, Register, TopologyMessage};
    use crate::meta_server::{MetaServerNode, MetaServerSettings, TopologyState};
    use crate::node::TopologyNode;

    async fn start_meta_server(port: u16) -> anyhow::Result<MetaServerNode> {
        let settings = MetaServerSettings::builder().node_id("meta_server").build();
        let mut node = MetaServerNode::new(settings);
        node.initialize_with(NodeAddress::new("127.0.0.1", port)).await?;
        Ok(node)
    }

    async fn call(
        framed: &mut Framed<TcpStream, PacketCodec>,
        message: TopologyMessage,
    ) -> anyhow::Result<TopologyMessage> {
        framed.send(Packet::new(encode_bytes(&message)?)).await?;
        let packet = framed
            .next()
            .await
            .ok_or_else(|| anyhow::anyhow!("connection closed"))??;
        decode_bytes(&packet)
    }

    fn register(node_id: &str, port: u16) -> TopologyMessage {
        TopologyMessage::Register(Register {
            node_id: node_id.to_string(),
            address: NodeAddress::new("127.0.0.1", port),
        })
    }

    fn heartbeat(node_id: &str) -> TopologyMessage {
        TopologyMessage::Heartbeat(Heartbeat {
            node_id: node_id.to_string(),
        })
    }

    #[tokio::test]
    async fn test_register_then_heartbeat() -> anyhow::Result<()> {
        let server = start_meta_server(8118).await?;
        let stream = TcpStream::connect(server.local_addr().unwrap()).await?;
        let mut framed = Framed::new(stream, PacketCodec);

        let ack = call(&mut framed, register("worker-0", 9000)).await?;
        assert!(matches!(ack, TopologyMessage::RegisterAck(a) if a.success));
        let members = server.members();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].node_id, "worker-0");
        assert_eq!(members[0].address, NodeAddress::new("127.0.0.1", 9000));
        assert_eq!(members[0].state, NodeState::Registered);
        let registered_at = members[0].last_heartbeat;

        tokio::time::sleep(Duration::from_millis(10)).await;
        let ack = call(&mut framed, heartbeat("worker-0")).await?;
        assert!(matches!(ack, TopologyMessage::HeartbeatAck(a) if a.success));
        let members = server.members();
        assert_eq!(members[0].state, NodeState::Alive);
        assert!(members[0].last_heartbeat > registered_at);

        // heartbeat for an unregistered id is acked negatively, table untouched
        let ack = call(&mut framed, heartbeat("worker-99")).await?;
        assert!(matches!(ack, TopologyMessage::HeartbeatAck(a) if !a.success));
        assert_eq!(server.members().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_garbage_packet_does_not_kill_server() -> anyhow::Result<()> {
        let server = start_meta_server(8119).await?;
        let stream = TcpStream::connect(server.local_addr().unwrap()).await?;
        let mut framed = Framed::new(stream, PacketCodec);

        framed.send(Packet::new(b"not a topology message".to_vec())).await?;
        // server drops the frame without replying and keeps serving
        let ack = call(&mut framed, register("worker-0", 9000)).await?;
        assert!(matches!(ack, TopologyMessage::RegisterAck(a) if a.success));
        Ok(())
    }

    #[tokio::test]
    async fn test_finalize_is_idempotent_and_releases_listener() -> anyhow::Result<()> {
        let mut server = start_meta_server(8120).await?;
        let addr = server.local_addr().unwrap();
        server.finalize().await?;
        server.finalize().await?;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(TcpStream::connect(addr).await.is_err());
        assert!(server.members().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_topology_state_tracks_expected_nodes() -> anyhow::Result<()> {
        let settings = MetaServerSettings::builder()
            .node_id("meta_server")
            .expected_nodes(Some(2))
            .build();
        let mut server = MetaServerNode::new(settings);
        server
            .initialize_with(NodeAddress::new("127.0.0.1", 8121))
            .await?;
        assert_eq!(server.topology_state(), TopologyState::Initializing);

        let stream = TcpStream::connect(server.local_addr().unwrap()).await?;
        let mut framed = Framed::new(stream, PacketCodec);
        call(&mut framed, register("worker-0", 9000)).await?;
        assert_eq!(server.topology_state(), TopologyState::Initializing);
        call(&mut framed, register("worker-1", 9001)).await?;
        assert_eq!(server.topology_state(), TopologyState::Initialized);

        // re-registration does not double count
        call(&mut framed, register("worker-1", 9001)).await?;
        assert_eq!(server.members().len(), 2);
        assert_eq!(server.topology_state(), TopologyState::Initialized);
        Ok(())
    }
}
