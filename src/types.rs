//! Core types shared by the snapshot layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Node identifier in the cluster.
pub type NodeId = u32;

/// Raft log index.
pub type LogIndex = u64;

/// Raft term.
pub type Term = u64;

/// A `host:port` node address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddr {
    /// Host name or IP address. Must not contain `;`, `,` or `:`.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

/// Error returned when a `host:port` string cannot be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid address: {0:?}")]
pub struct InvalidAddress(pub String);

impl NodeAddr {
    /// Create a new address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl FromStr for NodeAddr {
    type Err = InvalidAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidAddress(s.to_string());

        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() || port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let port: u16 = port.parse().map_err(|_| invalid())?;
        if port == 0 {
            return Err(invalid());
        }

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One member of a snapshotted cluster configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotCfgEntry {
    /// Node id, unique within one configuration.
    pub node_id: NodeId,
    /// Whether the node is active.
    pub active: bool,
    /// Whether the node votes.
    pub voting: bool,
    /// Address peers use to reach the node.
    pub addr: NodeAddr,
}

impl SnapshotCfgEntry {
    /// Create a new configuration entry.
    pub fn new(node_id: NodeId, active: bool, voting: bool, addr: NodeAddr) -> Self {
        Self {
            node_id,
            active,
            voting,
            addr,
        }
    }
}

/// Decoded snapshot metadata. Only its encoded form is ever persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SnapshotMetadata {
    /// Term of the last entry covered by the snapshot.
    pub last_included_term: Term,
    /// Index of the last entry covered by the snapshot.
    pub last_included_index: LogIndex,
    /// Committed cluster configuration at snapshot time.
    pub configuration: Vec<SnapshotCfgEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_addr() {
        let addr: NodeAddr = "10.0.0.1:5001".parse().unwrap();
        assert_eq!(addr, NodeAddr::new("10.0.0.1", 5001));
        assert_eq!(addr.to_string(), "10.0.0.1:5001");
    }

    #[test]
    fn test_parse_addr_rejects_malformed() {
        for bad in ["", "host", "host:", ":5000", "host:0", "host:70000", "host:50a0", "host:+50"] {
            assert!(bad.parse::<NodeAddr>().is_err(), "accepted {:?}", bad);
        }
    }
}
