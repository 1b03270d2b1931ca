use bincode::{Decode, Encode};

use crate::address::NodeAddress;

/// Control messages exchanged between compute graph nodes and the meta
/// server. Acks stay minimal (a success flag) so the protocol can grow
/// per-kind fields later without breaking decode.
#[derive(Debug, Clone, Encode, Decode)]
pub enum TopologyMessage {
    Register(Register),
    Heartbeat(Heartbeat),
    RegisterAck(RegisterAck),
    HeartbeatAck(HeartbeatAck),
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Register {
    pub node_id: String,
    pub address: NodeAddress,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Heartbeat {
    pub node_id: String,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct RegisterAck {
    pub success: bool,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct HeartbeatAck {
    pub success: bool,
}
