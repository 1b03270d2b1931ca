pub mod codec;
mod connection;
pub mod ext;
pub mod server;

pub use codec::{Packet, PacketCodec, PacketCodecError};
pub use server::{Inbound, InboundHandler, TcpServer, TransportError};
