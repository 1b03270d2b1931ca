use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use thiserror::Error;

use crate::address::NodeAddress;

/// Liveness state of one registered compute graph node. There is no timeout
/// driven `Dead` state; eviction on missed heartbeats is an extension point
/// and `last_heartbeat` carries what a failure detector would need.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum NodeState {
    Registered,
    Alive,
}

#[derive(Debug, Clone)]
pub struct MembershipRecord {
    pub node_id: String,
    pub address: NodeAddress,
    pub state: NodeState,
    pub last_heartbeat: Instant,
}

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("node {0} has never registered")]
    UnknownNode(String),
}

/// The authoritative node table of the job, keyed by node id. All access
/// goes through the internal mutex; critical sections are map-only, callers
/// never hold the lock across i/o.
#[derive(Debug, Default)]
pub struct MembershipTable {
    records: Mutex<HashMap<String, MembershipRecord>>,
}

impl MembershipTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node, or re-registers it: the address is updated, the
    /// state resets to `Registered` and the timestamp refreshes. Returns a
    /// copy of the stored record.
    pub fn upsert(&self, node_id: impl Into<String>, address: NodeAddress) -> MembershipRecord {
        let node_id = node_id.into();
        let record = MembershipRecord {
            node_id: node_id.clone(),
            address,
            state: NodeState::Registered,
            last_heartbeat: Instant::now(),
        };
        self.records.lock().insert(node_id, record.clone());
        record
    }

    pub fn record_heartbeat(&self, node_id: &str) -> Result<(), MembershipError> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(node_id)
            .ok_or_else(|| MembershipError::UnknownNode(node_id.to_string()))?;
        record.state = NodeState::Alive;
        record.last_heartbeat = Instant::now();
        Ok(())
    }

    /// Point-in-time defensive copy of every record.
    pub fn snapshot(&self) -> Vec<MembershipRecord> {
        self.records.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub(crate) fn clear(&self) {
        self.records.lock().clear();
    }
}
