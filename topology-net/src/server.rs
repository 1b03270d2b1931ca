use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::SplitStream;
use futures::StreamExt;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{info, warn};

use crate::codec::{Packet, PacketCodec};
use crate::connection::{Connection, ConnectionHandle, ConnectionTable, ConnectionTx};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind tcp addr {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("peer {0} is not connected")]
    NotConnected(SocketAddr),
    #[error("connection to peer {0} is closed")]
    ConnectionClosed(SocketAddr),
}

/// One fully decoded inbound packet together with a reply channel bound to
/// the connection it arrived on.
pub struct Inbound {
    pub peer: SocketAddr,
    pub packet: Packet,
    sender: ConnectionTx,
}

impl Inbound {
    pub async fn respond(&self, packet: Packet) -> Result<(), TransportError> {
        self.sender
            .send(packet)
            .await
            .map_err(|_| TransportError::ConnectionClosed(self.peer))
    }
}

/// Invoked once per inbound packet, in receive order on a given connection.
/// Calls from distinct connections may run concurrently.
#[async_trait]
pub trait InboundHandler: Send + Sync + 'static {
    async fn on_message(&self, inbound: Inbound);
}

/// Connection-per-client tcp server. Owns the listening socket and every
/// accepted connection; `stop` releases them all.
pub struct TcpServer {
    local_addr: SocketAddr,
    connections: ConnectionTable,
    acceptor: JoinHandle<()>,
}

impl TcpServer {
    pub async fn listen(
        addr: SocketAddr,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind { addr, source })?;
        let connections: ConnectionTable = Arc::new(DashMap::new());
        let acceptor = tokio::spawn(Self::accept_loop(
            listener,
            connections.clone(),
            handler,
        ));
        info!("tcp server listening on {}", local_addr);
        Ok(Self {
            local_addr,
            connections,
            acceptor,
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        connections: ConnectionTable,
        handler: Arc<dyn InboundHandler>,
    ) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    if let Err(error) = stream.set_nodelay(true) {
                        warn!("{} set tcp nodelay error {:?}, drop current connection", peer, error);
                        continue;
                    }
                    let framed = Framed::new(stream, PacketCodec);
                    let (sink, stream) = framed.split();
                    let (connection, tx) = Connection::new(peer, sink, connections.clone());
                    let writer = connection.start();
                    let reader = tokio::spawn(Self::read_loop(
                        stream,
                        peer,
                        tx.clone(),
                        connections.clone(),
                        handler.clone(),
                    ));
                    connections.insert(peer, ConnectionHandle { tx, reader, writer });
                }
                Err(error) => {
                    warn!("accept connection error {:?}", error);
                }
            }
        }
    }

    async fn read_loop(
        mut stream: SplitStream<Framed<TcpStream, PacketCodec>>,
        peer: SocketAddr,
        sender: ConnectionTx,
        connections: ConnectionTable,
        handler: Arc<dyn InboundHandler>,
    ) {
        loop {
            match stream.next().await {
                Some(Ok(packet)) => {
                    let inbound = Inbound {
                        peer,
                        packet,
                        sender: sender.clone(),
                    };
                    handler.on_message(inbound).await;
                }
                Some(Err(error)) => {
                    warn!("{} codec error {:?}", peer, error);
                    break;
                }
                None => {
                    break;
                }
            }
        }
        connections.remove(&peer);
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Best-effort push to an established peer connection.
    pub async fn send(&self, peer: SocketAddr, packet: Packet) -> Result<(), TransportError> {
        let tx = self
            .connections
            .get(&peer)
            .map(|connection| connection.tx.clone())
            .ok_or(TransportError::NotConnected(peer))?;
        tx.send(packet)
            .await
            .map_err(|_| TransportError::ConnectionClosed(peer))
    }

    /// Closes the listening socket and every open connection. Idempotent;
    /// safe to call while dispatches are in flight.
    pub fn stop(&self) {
        self.acceptor.abort();
        for entry in self.connections.iter() {
            entry.value().abort();
        }
        self.connections.clear();
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod test {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpStream;
    use tokio_util::codec::Framed;

    use crate::codec::{Packet, PacketCodec};
    use crate::server::{Inbound, InboundHandler, TcpServer, TransportError};

    struct EchoHandler {
        peers: tokio::sync::mpsc::Sender<SocketAddr>,
    }

    #[async_trait]
    impl InboundHandler for EchoHandler {
        async fn on_message(&self, inbound: Inbound) {
            let _ = self.peers.send(inbound.peer).await;
            let _ = inbound.respond(Packet::new(inbound.packet.body.clone())).await;
        }
    }

    async fn echo_server() -> anyhow::Result<(TcpServer, tokio::sync::mpsc::Receiver<SocketAddr>)> {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let handler = Arc::new(EchoHandler { peers: tx });
        let server = TcpServer::listen("127.0.0.1:18121".parse()?, handler).await?;
        Ok((server, rx))
    }

    #[tokio::test]
    async fn test_echo_and_server_push() -> anyhow::Result<()> {
        let (server, mut peers) = echo_server().await?;
        let stream = TcpStream::connect(server.local_addr()).await?;
        let mut framed = Framed::new(stream, PacketCodec);

        framed.send(Packet::new(b"ping".to_vec())).await?;
        let echoed = framed.next().await.unwrap()?;
        assert_eq!(echoed.body, b"ping");

        // the handler observed the peer, so the server can push to it
        let peer = peers.recv().await.unwrap();
        server.send(peer, Packet::new(b"push".to_vec())).await?;
        let pushed = framed.next().await.unwrap()?;
        assert_eq!(pushed.body, b"push");

        let unknown: SocketAddr = "127.0.0.1:1".parse()?;
        assert!(matches!(
            server.send(unknown, Packet::new(vec![])).await,
            Err(TransportError::NotConnected(_))
        ));
        server.stop();
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_releases_listener() -> anyhow::Result<()> {
        let (tx, _rx) = tokio::sync::mpsc::channel(16);
        let handler = Arc::new(EchoHandler { peers: tx });
        let server = TcpServer::listen("127.0.0.1:18122".parse()?, handler).await?;
        let addr = server.local_addr();
        assert!(TcpStream::connect(addr).await.is_ok());

        server.stop();
        server.stop();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(TcpStream::connect(addr).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_bind_error_on_addr_in_use() -> anyhow::Result<()> {
        let (tx, _rx) = tokio::sync::mpsc::channel(16);
        let handler: Arc<EchoHandler> = Arc::new(EchoHandler { peers: tx });
        let server = TcpServer::listen("127.0.0.1:18123".parse()?, handler.clone()).await?;
        let second = TcpServer::listen(server.local_addr(), handler).await;
        assert!(matches!(second, Err(TransportError::Bind { .. })));
        server.stop();
        Ok(())
    }
}
