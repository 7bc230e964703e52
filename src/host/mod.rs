//! Interface to the host key-value store.
//!
//! The host owns the keyspace and its own primary/replica replication. The
//! snapshot layer uses it to persist metadata in a keyspace record and to pull
//! a full dataset from another node.

mod report;

pub use report::{ReplicationStatus, LINK_STATUS_KEY, LINK_UP, SYNC_DONE, SYNC_IN_PROGRESS_KEY};

use crate::error::HostError;
use crate::types::NodeAddr;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;

/// Keyspace and replication-control surface of the host store.
pub trait HostStore: Send + 'static {
    /// Set `fields` on the hash record `key`, creating it if needed.
    fn set_fields(&mut self, key: &str, fields: &[(&str, String)]) -> Result<(), HostError>;

    /// All `(field, value)` pairs of the hash record `key`, in host order.
    ///
    /// A missing record yields an empty list; a key of another type fails
    /// with `HostError::WrongType`.
    fn get_all_fields(&mut self, key: &str) -> Result<Vec<(Bytes, Bytes)>, HostError>;

    /// Start replicating the full dataset from `source`.
    fn replicate_from(&mut self, source: &NodeAddr) -> Result<(), HostError>;

    /// Stop acting as a replica.
    fn detach_replica(&mut self) -> Result<(), HostError>;

    /// Raw replication status report (`key: value` lines).
    fn replication_report(&mut self) -> Result<Bytes, HostError>;
}

/// Host store guarded by the lock shared between the request context and the
/// tick context. Every access goes through a scoped guard.
pub type SharedHost<H> = Arc<Mutex<H>>;

/// Wrap a host store for shared, locked access.
pub fn shared<H: HostStore>(host: H) -> SharedHost<H> {
    Arc::new(Mutex::new(host))
}
