use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use stubborn_io::tokio::StubbornIo;
use stubborn_io::{ReconnectOptions, StubbornTcpStream};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{info, warn};
use typed_builder::TypedBuilder;

use topology_net::ext::{decode_bytes, encode_bytes};
use topology_net::{Packet, PacketCodec};

use crate::address::{resolve_meta_server_address, NodeAddress};
use crate::message::{Heartbeat, Register, RegisterAck, TopologyMessage};
use crate::node::{InitError, TopologyNode};

type MetaFramed = Framed<StubbornIo<TcpStream, SocketAddr>, PacketCodec>;

#[derive(Debug, Clone, TypedBuilder)]
pub struct ComputeNodeSettings {
    #[builder(setter(into))]
    pub node_id: String,
    /// The address this node advertises to the rest of the job.
    pub address: NodeAddress,
    #[builder(default = Duration::from_secs(3))]
    pub heartbeat_interval: Duration,
    #[builder(default = Duration::from_secs(10))]
    pub register_timeout: Duration,
}

/// A worker process participating in the job: registers with the meta server
/// at startup and keeps its membership record fresh with heartbeats.
pub struct ComputeGraphNode {
    settings: ComputeNodeSettings,
    heartbeat: Option<JoinHandle<()>>,
}

impl ComputeGraphNode {
    pub fn new(settings: ComputeNodeSettings) -> Self {
        Self {
            settings,
            heartbeat: None,
        }
    }

    /// Connects to the given meta server, registers and starts the heartbeat
    /// loop. Used by `TopologyNode::initialize` after env resolution,
    /// directly by tests.
    pub async fn initialize_with(&mut self, meta_addr: NodeAddress) -> Result<(), InitError> {
        let socket_addr = meta_addr
            .socket_addr()
            .await
            .map_err(|source| InitError::Lookup {
                addr: meta_addr.clone(),
                source,
            })?;
        let opts = ReconnectOptions::new().with_exit_if_first_connect_fails(true);
        let stream = StubbornTcpStream::connect_with_options(socket_addr, opts)
            .await
            .map_err(|source| InitError::Connect {
                addr: meta_addr.clone(),
                source,
            })?;
        let mut framed = Framed::new(stream, PacketCodec);
        self.register(&mut framed, &meta_addr).await?;
        info!(
            "compute graph node {} joined topology at {}",
            self.settings.node_id, meta_addr
        );
        let settings = self.settings.clone();
        self.heartbeat = Some(tokio::spawn(Self::heartbeat_loop(framed, settings)));
        Ok(())
    }

    async fn register(
        &self,
        framed: &mut MetaFramed,
        meta_addr: &NodeAddress,
    ) -> Result<(), InitError> {
        let register = TopologyMessage::Register(Register {
            node_id: self.settings.node_id.clone(),
            address: self.settings.address.clone(),
        });
        Self::send_message(framed, &register)
            .await
            .map_err(|source| InitError::Register {
                addr: meta_addr.clone(),
                source,
            })?;
        let reply = tokio::time::timeout(self.settings.register_timeout, framed.next())
            .await
            .map_err(|_| InitError::RegisterTimeout {
                addr: meta_addr.clone(),
                timeout: self.settings.register_timeout,
            })?;
        let packet = match reply {
            Some(Ok(packet)) => packet,
            Some(Err(error)) => {
                return Err(InitError::Register {
                    addr: meta_addr.clone(),
                    source: error.into(),
                });
            }
            None => {
                return Err(InitError::Register {
                    addr: meta_addr.clone(),
                    source: anyhow::anyhow!("connection closed by meta server"),
                });
            }
        };
        match decode_bytes::<TopologyMessage>(&packet) {
            Ok(TopologyMessage::RegisterAck(RegisterAck { success: true })) => Ok(()),
            Ok(TopologyMessage::RegisterAck(_)) => Err(InitError::RegisterRejected {
                addr: meta_addr.clone(),
            }),
            Ok(other) => Err(InitError::Register {
                addr: meta_addr.clone(),
                source: anyhow::anyhow!("unexpected register reply {:?}", other),
            }),
            Err(error) => Err(InitError::Register {
                addr: meta_addr.clone(),
                source: error,
            }),
        }
    }

    async fn heartbeat_loop(mut framed: MetaFramed, settings: ComputeNodeSettings) {
        let node_id = settings.node_id;
        let mut ticker = tokio::time::interval(settings.heartbeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let heartbeat = TopologyMessage::Heartbeat(Heartbeat {
                node_id: node_id.clone(),
            });
            if let Err(error) = Self::send_message(&mut framed, &heartbeat).await {
                warn!("{} heartbeat send error {:?}", node_id, error);
                continue;
            }
            match Self::recv_message(&mut framed, settings.heartbeat_interval).await {
                Ok(TopologyMessage::HeartbeatAck(ack)) => {
                    if !ack.success {
                        // the meta server lost our record, likely a restart
                        info!("{} re-registering with meta server", node_id);
                        let register = TopologyMessage::Register(Register {
                            node_id: node_id.clone(),
                            address: settings.address.clone(),
                        });
                        if let Err(error) = Self::send_message(&mut framed, &register).await {
                            warn!("{} re-register send error {:?}", node_id, error);
                            continue;
                        }
                        match Self::recv_message(&mut framed, settings.heartbeat_interval).await {
                            Ok(TopologyMessage::RegisterAck(ack)) if ack.success => {
                                info!("{} re-registered", node_id);
                            }
                            Ok(other) => {
                                warn!("{} unexpected re-register reply {:?}", node_id, other);
                            }
                            Err(error) => {
                                warn!("{} re-register ack error {:?}", node_id, error);
                            }
                        }
                    }
                }
                Ok(other) => {
                    warn!("{} unexpected heartbeat reply {:?}", node_id, other);
                }
                Err(error) => {
                    warn!("{} heartbeat ack error {:?}", node_id, error);
                }
            }
        }
    }

    async fn send_message(framed: &mut MetaFramed, message: &TopologyMessage) -> anyhow::Result<()> {
        let bytes = encode_bytes(message)?;
        framed.send(Packet::new(bytes)).await?;
        Ok(())
    }

    async fn recv_message(framed: &mut MetaFramed, wait: Duration) -> anyhow::Result<TopologyMessage> {
        let reply = tokio::time::timeout(wait, framed.next())
            .await
            .map_err(|_| anyhow::anyhow!("no reply from meta server within {:?}", wait))?;
        match reply {
            Some(Ok(packet)) => decode_bytes(&packet),
            Some(Err(error)) => Err(error.into()),
            None => Err(anyhow::anyhow!("connection closed by meta server")),
        }
    }
}

#[async_trait]
impl TopologyNode for ComputeGraphNode {
    fn node_id(&self) -> &str {
        &self.settings.node_id
    }

    async fn initialize(&mut self) -> Result<(), InitError> {
        let meta_addr = resolve_meta_server_address()?;
        self.initialize_with(meta_addr).await
    }

    async fn finalize(&mut self) -> anyhow::Result<()> {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
            info!("compute graph node {} finalized", self.settings.node_id);
        }
        Ok(())
    }
}
