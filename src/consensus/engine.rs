//! Interface to the external consensus engine.
//!
//! The engine owns leader election, log replication and the node registry.
//! This layer only drives it through the snapshot primitives and registry
//! calls declared here.

use crate::error::EngineError;
use crate::types::{LogIndex, NodeAddr, NodeId, Term};
use std::fmt;

/// Connection state of a registry node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection attempt made yet.
    Disconnected,
    /// Connection attempt in flight.
    Connecting,
    /// Connection established and usable.
    Connected,
}

/// A remote node known to the registry, with its connection handle.
///
/// Dropping a `Node` releases its connection.
pub struct Node {
    id: NodeId,
    addr: NodeAddr,
    state: ConnectionState,
}

impl Node {
    /// Create a node with a fresh, not yet connected connection object.
    pub fn new(id: NodeId, addr: NodeAddr) -> Self {
        Self {
            id,
            addr,
            state: ConnectionState::Disconnected,
        }
    }

    /// Node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Address used to reach the node.
    pub fn addr(&self) -> &NodeAddr {
        &self.addr
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Update the connection state.
    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("addr", &self.addr.to_string())
            .field("state", &self.state)
            .finish()
    }
}

/// Registry view of one cluster member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    /// Node id.
    pub id: NodeId,
    /// Whether the node is active.
    pub active: bool,
    /// Whether the node's voting status is committed.
    pub voting_committed: bool,
    /// Whether the node's addition to the cluster is committed.
    pub addition_committed: bool,
    /// Address from the node's connection. `None` for the local node,
    /// which has no connection.
    pub addr: Option<NodeAddr>,
}

/// Primitives the snapshot layer needs from the consensus engine.
pub trait ConsensusEngine: Send + 'static {
    /// Id of the local node.
    fn local_id(&self) -> NodeId;

    /// Current term.
    fn current_term(&self) -> Term;

    /// Index of the last entry applied to the state machine.
    fn last_applied_index(&self) -> LogIndex;

    /// Index of the last entry in the log.
    fn current_index(&self) -> LogIndex;

    /// Commit index.
    fn commit_index(&self) -> LogIndex;

    /// Number of entries currently held in the log.
    fn log_count(&self) -> u64;

    /// Registry members in registry order, including the local node.
    fn members(&self) -> Vec<MemberInfo>;

    /// Pick the compactable prefix and apply every committed entry.
    fn begin_snapshot(&mut self) -> Result<(), EngineError>;

    /// Discard the log prefix chosen by `begin_snapshot`.
    fn end_snapshot(&mut self) -> Result<(), EngineError>;

    /// Start installing a snapshot at `(term, index)`.
    fn begin_load_snapshot(&mut self, term: Term, index: LogIndex) -> Result<(), EngineError>;

    /// Finish installing the snapshot.
    fn end_load_snapshot(&mut self) -> Result<(), EngineError>;

    /// Remove a node from the registry, returning it so its connection can
    /// be released.
    fn remove_node(&mut self, id: NodeId) -> Result<Node, EngineError>;

    /// Add a voting node.
    fn add_voting_node(&mut self, node: Node) -> Result<(), EngineError>;

    /// Add a non-voting node.
    fn add_non_voting_node(&mut self, node: Node) -> Result<(), EngineError>;

    /// Mark a node active or inactive.
    fn set_node_active(&mut self, id: NodeId, active: bool) -> Result<(), EngineError>;
}
