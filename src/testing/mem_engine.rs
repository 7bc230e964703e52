//! In-memory consensus engine.

use crate::consensus::{ConsensusEngine, MemberInfo, Node};
use crate::error::EngineError;
use crate::types::{LogIndex, NodeAddr, NodeId, Term};

#[derive(Debug)]
struct Registered {
    node: Node,
    active: bool,
    voting: bool,
    addition_committed: bool,
}

/// Consensus engine fake with a node registry and snapshot bookkeeping.
///
/// The log is only tracked by index: `append_entries` grows it and
/// `commit` moves the commit index. `begin_snapshot` applies everything
/// committed and fails when nothing was committed past the last snapshot.
#[derive(Debug)]
pub struct MemEngine {
    local_id: NodeId,
    local_active: bool,
    term: Term,
    current_index: LogIndex,
    commit_index: LogIndex,
    last_applied: LogIndex,
    snapshot_index: LogIndex,
    snapshot_pending: Option<LogIndex>,
    loading: Option<(Term, LogIndex)>,
    load_begun: bool,
    nodes: Vec<Registered>,
    released: usize,
}

impl MemEngine {
    /// Engine for node `local_id` with an empty log and no peers.
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            local_active: true,
            term: 1,
            current_index: 0,
            commit_index: 0,
            last_applied: 0,
            snapshot_index: 0,
            snapshot_pending: None,
            loading: None,
            load_begun: false,
            nodes: Vec::new(),
            released: 0,
        }
    }

    /// Set the current term.
    pub fn set_term(&mut self, term: Term) {
        self.term = term;
    }

    /// Append `count` entries to the log.
    pub fn append_entries(&mut self, count: u64) {
        self.current_index += count;
    }

    /// Move the commit index, capped at the last log index.
    pub fn commit(&mut self, index: LogIndex) {
        self.commit_index = index.min(self.current_index);
    }

    /// Register a peer whose addition is committed.
    pub fn add_member(&mut self, id: NodeId, addr: NodeAddr, active: bool, voting: bool) {
        self.nodes.push(Registered {
            node: Node::new(id, addr),
            active,
            voting,
            addition_committed: true,
        });
    }

    /// Register a voting peer whose addition is not committed yet.
    pub fn add_uncommitted_member(&mut self, id: NodeId, addr: NodeAddr) {
        self.nodes.push(Registered {
            node: Node::new(id, addr),
            active: true,
            voting: true,
            addition_committed: false,
        });
    }

    /// A peer's node object.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|r| r.node.id() == id).map(|r| &r.node)
    }

    /// A member's registry view, local node included.
    pub fn member(&self, id: NodeId) -> Option<MemberInfo> {
        self.members().into_iter().find(|m| m.id == id)
    }

    /// Index the log was last compacted or loaded at.
    pub fn snapshot_index(&self) -> LogIndex {
        self.snapshot_index
    }

    /// Number of node objects removed from the registry so far.
    pub fn released_connections(&self) -> usize {
        self.released
    }

    /// Whether `begin_load_snapshot` ever succeeded.
    pub fn load_begun(&self) -> bool {
        self.load_begun
    }

    fn position(&self, id: NodeId) -> Option<usize> {
        self.nodes.iter().position(|r| r.node.id() == id)
    }

    fn add_node(&mut self, node: Node, voting: bool) -> Result<(), EngineError> {
        if node.id() == self.local_id || self.position(node.id()).is_some() {
            return Err(EngineError::NodeExists(node.id()));
        }
        self.nodes.push(Registered {
            node,
            active: true,
            voting,
            addition_committed: true,
        });
        Ok(())
    }
}

impl ConsensusEngine for MemEngine {
    fn local_id(&self) -> NodeId {
        self.local_id
    }

    fn current_term(&self) -> Term {
        self.term
    }

    fn last_applied_index(&self) -> LogIndex {
        self.last_applied
    }

    fn current_index(&self) -> LogIndex {
        self.current_index
    }

    fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    fn log_count(&self) -> u64 {
        self.current_index - self.snapshot_index
    }

    fn members(&self) -> Vec<MemberInfo> {
        let local = MemberInfo {
            id: self.local_id,
            active: self.local_active,
            voting_committed: true,
            addition_committed: true,
            addr: None,
        };

        std::iter::once(local)
            .chain(self.nodes.iter().map(|r| MemberInfo {
                id: r.node.id(),
                active: r.active,
                voting_committed: r.voting,
                addition_committed: r.addition_committed,
                addr: Some(r.node.addr().clone()),
            }))
            .collect()
    }

    fn begin_snapshot(&mut self) -> Result<(), EngineError> {
        if self.snapshot_pending.is_some() || self.loading.is_some() {
            return Err(EngineError::SnapshotInProgress);
        }
        if self.commit_index <= self.snapshot_index {
            return Err(EngineError::NothingToCompact);
        }
        self.last_applied = self.commit_index;
        self.snapshot_pending = Some(self.commit_index);
        Ok(())
    }

    fn end_snapshot(&mut self) -> Result<(), EngineError> {
        let index = self
            .snapshot_pending
            .take()
            .ok_or_else(|| EngineError::Internal("no snapshot in progress".to_string()))?;
        self.snapshot_index = index;
        Ok(())
    }

    fn begin_load_snapshot(&mut self, term: Term, index: LogIndex) -> Result<(), EngineError> {
        if self.loading.is_some() || self.snapshot_pending.is_some() {
            return Err(EngineError::SnapshotInProgress);
        }
        if index <= self.commit_index || index <= self.snapshot_index {
            return Err(EngineError::AlreadyApplied { index });
        }
        self.loading = Some((term, index));
        self.load_begun = true;
        Ok(())
    }

    fn end_load_snapshot(&mut self) -> Result<(), EngineError> {
        let (term, index) = self
            .loading
            .take()
            .ok_or_else(|| EngineError::Internal("no snapshot load in progress".to_string()))?;
        self.term = self.term.max(term);
        self.snapshot_index = index;
        self.last_applied = index;
        self.commit_index = index;
        self.current_index = index;
        Ok(())
    }

    fn remove_node(&mut self, id: NodeId) -> Result<Node, EngineError> {
        let pos = self.position(id).ok_or(EngineError::NodeNotFound(id))?;
        self.released += 1;
        Ok(self.nodes.remove(pos).node)
    }

    fn add_voting_node(&mut self, node: Node) -> Result<(), EngineError> {
        self.add_node(node, true)
    }

    fn add_non_voting_node(&mut self, node: Node) -> Result<(), EngineError> {
        self.add_node(node, false)
    }

    fn set_node_active(&mut self, id: NodeId, active: bool) -> Result<(), EngineError> {
        if id == self.local_id {
            self.local_active = active;
            return Ok(());
        }
        let pos = self.position(id).ok_or(EngineError::NodeNotFound(id))?;
        self.nodes[pos].active = active;
        Ok(())
    }
}
