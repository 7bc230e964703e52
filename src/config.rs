//! Configuration types for the snapshot layer.

use crate::error::{Error, Result};
use crate::types::{NodeAddr, NodeId};
use std::time::Duration;

/// Name of the keyspace record holding snapshot metadata.
pub const DEFAULT_METADATA_KEY: &str = "__raft_snapshot__";

/// Main configuration for the snapshot layer.
#[derive(Debug, Clone)]
pub struct LayerConfig {
    /// Id of the local node.
    pub node_id: NodeId,

    /// Address of the local node. The local node has no registry entry,
    /// so this is what gets written into snapshots for it.
    pub addr: NodeAddr,

    /// Entry cache configuration.
    pub entry_cache: EntryCacheConfig,

    /// Snapshot configuration.
    pub snapshot: SnapshotConfig,

    /// Leader forwarding configuration.
    pub forwarding: ForwardingConfig,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            addr: NodeAddr::new("127.0.0.1", 5001),
            entry_cache: EntryCacheConfig::default(),
            snapshot: SnapshotConfig::default(),
            forwarding: ForwardingConfig::default(),
        }
    }
}

impl LayerConfig {
    /// Create a new configuration for the given node.
    pub fn new(node_id: NodeId, addr: NodeAddr) -> Self {
        Self {
            node_id,
            addr,
            ..Default::default()
        }
    }

    /// Set entry cache configuration.
    pub fn with_entry_cache_config(mut self, entry_cache: EntryCacheConfig) -> Self {
        self.entry_cache = entry_cache;
        self
    }

    /// Set the entry cache memory budget.
    pub fn with_entry_cache_max_bytes(mut self, max_bytes: usize) -> Self {
        self.entry_cache.max_bytes = max_bytes;
        self
    }

    /// Set snapshot configuration.
    pub fn with_snapshot_config(mut self, snapshot: SnapshotConfig) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Set forwarding configuration.
    pub fn with_forwarding_config(mut self, forwarding: ForwardingConfig) -> Self {
        self.forwarding = forwarding;
        self
    }

    /// Check the configuration for values that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.addr.port == 0 {
            return Err(Error::Config("local address port must not be 0".to_string()));
        }
        if self.addr.host.is_empty() {
            return Err(Error::Config("local address host must not be empty".to_string()));
        }
        if self.addr.host.contains([';', ',', ':']) {
            return Err(Error::Config(format!(
                "host {:?} contains a reserved character",
                self.addr.host
            )));
        }
        if self.entry_cache.initial_capacity == 0 {
            return Err(Error::Config("entry cache capacity must be positive".to_string()));
        }
        if self.snapshot.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be positive".to_string()));
        }
        if self.snapshot.metadata_key.is_empty() {
            return Err(Error::Config("metadata key must not be empty".to_string()));
        }
        if self.forwarding.max_pending == 0 {
            return Err(Error::Config("max pending forwards must be positive".to_string()));
        }
        Ok(())
    }
}

/// Entry cache configuration.
#[derive(Debug, Clone)]
pub struct EntryCacheConfig {
    /// Initial number of slots in the ring buffer. Grows by doubling.
    pub initial_capacity: usize,

    /// Memory budget for cached entry payloads, in bytes.
    pub max_bytes: usize,
}

impl Default for EntryCacheConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 512,
            max_bytes: 64 * 1024 * 1024, // 64MB
        }
    }
}

impl EntryCacheConfig {
    /// Create a new entry cache configuration.
    pub fn new(initial_capacity: usize, max_bytes: usize) -> Self {
        Self {
            initial_capacity,
            max_bytes,
        }
    }
}

/// Snapshot configuration.
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Keyspace record that holds the snapshot metadata.
    pub metadata_key: String,

    /// How often the handshake polls replication progress.
    pub poll_interval: Duration,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            metadata_key: DEFAULT_METADATA_KEY.to_string(),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl SnapshotConfig {
    /// Set the metadata record name.
    pub fn with_metadata_key(mut self, key: impl Into<String>) -> Self {
        self.metadata_key = key.into();
        self
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Leader forwarding configuration.
#[derive(Debug, Clone)]
pub struct ForwardingConfig {
    /// Maximum number of forwarded commands awaiting a reply.
    pub max_pending: usize,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self { max_pending: 5000 }
    }
}

impl ForwardingConfig {
    /// Set the maximum number of pending forwards.
    pub fn with_max_pending(mut self, max: usize) -> Self {
        self.max_pending = max;
        self
    }
}
