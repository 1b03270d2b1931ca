use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::warn;

use crate::codec::{Packet, PacketCodec};

pub type ConnectionTx = tokio::sync::mpsc::Sender<Packet>;
pub type ConnectionRx = tokio::sync::mpsc::Receiver<Packet>;

pub(crate) type ConnectionTable = Arc<DashMap<SocketAddr, ConnectionHandle>>;

/// Live state of one accepted connection. Dropping the handle (removal from
/// the table) closes the outbound channel, which ends the writer task.
#[derive(Debug)]
pub(crate) struct ConnectionHandle {
    pub(crate) tx: ConnectionTx,
    pub(crate) reader: JoinHandle<()>,
    pub(crate) writer: JoinHandle<()>,
}

impl ConnectionHandle {
    pub(crate) fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Writer half of an accepted connection: drains the outbound channel into
/// the framed sink. A send failure tears the connection down.
pub(crate) struct Connection {
    peer: SocketAddr,
    sink: SplitSink<Framed<TcpStream, PacketCodec>, Packet>,
    rx: ConnectionRx,
    connections: ConnectionTable,
}

impl Connection {
    pub(crate) fn new(
        peer: SocketAddr,
        sink: SplitSink<Framed<TcpStream, PacketCodec>, Packet>,
        connections: ConnectionTable,
    ) -> (Self, ConnectionTx) {
        let (tx, rx) = tokio::sync::mpsc::channel(10000);
        let connection = Self {
            peer,
            sink,
            rx,
            connections,
        };
        (connection, tx)
    }

    pub(crate) fn start(self) -> JoinHandle<()> {
        let mut connection = self;
        tokio::spawn(async move {
            loop {
                match connection.rx.recv().await {
                    None => {
                        break;
                    }
                    Some(packet) => {
                        if let Err(error) = connection.sink.send(packet).await {
                            let peer = connection.peer;
                            warn!("send packet to {} error {:?}, drop current connection", peer, error);
                            connection.connections.remove(&peer);
                            break;
                        }
                    }
                }
            }
        })
    }
}
