//! Snapshot create and load lifecycle.
//!
//! # Create
//!
//! 1. `begin_snapshot()` picks the compactable log prefix and applies every
//!    committed entry.
//! 2. The metadata record is written (term, applied index, configuration).
//!    This must come after step 1 so the stored index matches the state
//!    machine.
//! 3. `end_snapshot()` discards the compacted prefix.
//!
//! # Load
//!
//! Runs after the host has pulled a full dataset from another node:
//!
//! 1. Read and decode the metadata record. Failures abort without touching
//!    consensus state.
//! 2. `begin_load_snapshot(term, index)`. Past this point the load always
//!    runs to completion.
//! 3. Drop every registry node except the local one.
//! 4. Re-add the snapshot's members.
//! 5. `end_load_snapshot()`.
//!
//! Durability of the keyspace record is left to the host store.

use crate::config::SnapshotConfig;
use crate::consensus::{ConsensusEngine, Node};
use crate::error::{HostError, Result, SnapshotError};
use crate::host::{HostStore, SharedHost};
use crate::metrics::LayerMetrics;
use crate::snapshot::codec::{committed_configuration, decode_metadata, encode_metadata};
use crate::types::{NodeAddr, SnapshotMetadata};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Drives snapshot creation and loading against the engine and host store.
pub struct SnapshotManager<E, H> {
    /// Consensus engine, driven from the tick context.
    engine: Arc<Mutex<E>>,

    /// Host store behind the lock shared with the request context.
    host: SharedHost<H>,

    /// Address written into snapshots for the local node.
    local_addr: NodeAddr,

    /// Configuration.
    config: SnapshotConfig,

    /// Whether a snapshot create or load is active.
    in_progress: AtomicBool,

    /// Metrics.
    metrics: Arc<LayerMetrics>,
}

/// Clears the in-progress flag when a snapshot operation returns.
struct InProgressGuard<'a>(&'a AtomicBool);

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<E: ConsensusEngine, H: HostStore> SnapshotManager<E, H> {
    /// Create a new snapshot manager.
    pub fn new(
        engine: Arc<Mutex<E>>,
        host: SharedHost<H>,
        local_addr: NodeAddr,
        config: SnapshotConfig,
        metrics: Arc<LayerMetrics>,
    ) -> Self {
        Self {
            engine,
            host,
            local_addr,
            config,
            in_progress: AtomicBool::new(false),
            metrics,
        }
    }

    /// The consensus engine.
    pub fn engine(&self) -> &Arc<Mutex<E>> {
        &self.engine
    }

    /// The shared host store.
    pub fn host(&self) -> &SharedHost<H> {
        &self.host
    }

    /// The metrics registry.
    pub fn metrics(&self) -> &Arc<LayerMetrics> {
        &self.metrics
    }

    /// Whether a snapshot create or load is active.
    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Claim the snapshot slot for a background load. Returns false if taken.
    pub(crate) fn begin_background_load(&self) -> bool {
        self.in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Release the slot claimed by `begin_background_load`.
    pub(crate) fn end_background_load(&self) {
        self.in_progress.store(false, Ordering::SeqCst);
    }

    /// Take a snapshot and compact the log.
    ///
    /// Returns the metadata that was persisted. Fails with
    /// `NothingToCompact` when the engine has nothing to compact or another
    /// snapshot operation is active; nothing is written in that case.
    ///
    /// # Panics
    /// Panics if the metadata record cannot be written. The engine has
    /// already applied everything up to the snapshot index at that point,
    /// and compacting without a matching record would lose the configuration.
    pub fn perform_snapshot(&self) -> Result<SnapshotMetadata> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Snapshot requested while another snapshot operation is active");
            self.metrics.snapshots_failed.inc();
            return Err(SnapshotError::NothingToCompact.into());
        }
        let _guard = InProgressGuard(&self.in_progress);

        let mut engine = self.engine.lock();

        if let Err(e) = engine.begin_snapshot() {
            debug!(error = %e, "Engine refused to begin snapshot");
            self.metrics.snapshots_failed.inc();
            return Err(SnapshotError::NothingToCompact.into());
        }

        let metadata = SnapshotMetadata {
            last_included_term: engine.current_term(),
            last_included_index: engine.last_applied_index(),
            configuration: committed_configuration(
                &engine.members(),
                engine.local_id(),
                &self.local_addr,
            ),
        };

        debug!(
            term = metadata.last_included_term,
            index = metadata.last_included_index,
            members = metadata.configuration.len(),
            "Storing snapshot metadata"
        );

        if let Err(e) = self.store_metadata(&metadata) {
            error!(error = %e, "CRITICAL: Failed to persist snapshot metadata");
            panic!("failed to persist snapshot metadata: {}", e);
        }

        if let Err(e) = engine.end_snapshot() {
            error!(error = %e, "Engine failed to finish snapshot");
            return Err(e.into());
        }

        self.metrics.snapshots_created.inc();
        info!(
            term = metadata.last_included_term,
            index = metadata.last_included_index,
            "Snapshot created"
        );

        Ok(metadata)
    }

    /// Install the snapshot described by the metadata record.
    ///
    /// Fails with `InProgress` while another snapshot operation is active.
    pub fn load_snapshot(&self) -> Result<SnapshotMetadata> {
        if !self.begin_background_load() {
            debug!("Snapshot load requested while another snapshot operation is active");
            return Err(SnapshotError::InProgress.into());
        }
        let _guard = InProgressGuard(&self.in_progress);

        self.install_snapshot()
    }

    /// Load body. The caller holds the snapshot slot.
    pub(crate) fn install_snapshot(&self) -> Result<SnapshotMetadata> {
        let metadata = match self.read_metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                error!(error = %e, "Failed to load snapshot metadata, aborting");
                self.metrics.snapshot_loads_failed.inc();
                return Err(e);
            }
        };

        info!(
            term = metadata.last_included_term,
            index = metadata.last_included_index,
            "Beginning snapshot load"
        );

        let mut engine = self.engine.lock();

        if let Err(e) = engine
            .begin_load_snapshot(metadata.last_included_term, metadata.last_included_index)
        {
            error!(error = %e, "Cannot load snapshot, already loaded?");
            self.metrics.snapshot_loads_failed.inc();
            return Err(SnapshotError::StaleSnapshot {
                term: metadata.last_included_term,
                index: metadata.last_included_index,
            }
            .into());
        }

        Self::remove_all_nodes(&mut *engine);
        Self::load_nodes(&mut *engine, &metadata);

        if let Err(e) = engine.end_load_snapshot() {
            error!(error = %e, "Engine failed to finish snapshot load");
            self.metrics.snapshot_loads_failed.inc();
            return Err(e.into());
        }

        self.metrics.snapshots_loaded.inc();
        info!(
            term = metadata.last_included_term,
            index = metadata.last_included_index,
            members = metadata.configuration.len(),
            "Snapshot loaded"
        );

        Ok(metadata)
    }

    fn store_metadata(&self, metadata: &SnapshotMetadata) -> std::result::Result<(), HostError> {
        let fields = encode_metadata(metadata);
        let fields: Vec<(&str, String)> = fields.iter().map(|(k, v)| (*k, v.clone())).collect();

        let mut host = self.host.lock();
        host.set_fields(&self.config.metadata_key, &fields)
    }

    fn read_metadata(&self) -> Result<SnapshotMetadata> {
        let fields = {
            let mut host = self.host.lock();
            host.get_all_fields(&self.config.metadata_key)
        };

        let fields = match fields {
            Ok(fields) => fields,
            Err(HostError::WrongType(key)) => {
                return Err(SnapshotError::CorruptMetadata(format!(
                    "record {} is not a hash",
                    key
                ))
                .into());
            }
            Err(e) => return Err(e.into()),
        };

        let metadata = decode_metadata(&fields)?;

        // The creating node is always part of its own configuration.
        if metadata.configuration.is_empty() {
            return Err(SnapshotError::CorruptMetadata("empty configuration".to_string()).into());
        }

        Ok(metadata)
    }

    /// Remove every node but the local one, releasing their connections.
    fn remove_all_nodes(engine: &mut E) {
        let local_id = engine.local_id();
        let ids: Vec<_> = engine
            .members()
            .into_iter()
            .map(|m| m.id)
            .filter(|id| *id != local_id)
            .collect();

        for id in ids {
            match engine.remove_node(id) {
                Ok(node) => {
                    debug!(node_id = id, addr = %node.addr(), "Removed node for snapshot load");
                    drop(node);
                }
                Err(e) => warn!(node_id = id, error = %e, "Failed to remove node"),
            }
        }
    }

    /// Add the snapshot's members. Expects the registry to hold only the local node.
    fn load_nodes(engine: &mut E, metadata: &SnapshotMetadata) {
        let local_id = engine.local_id();

        for cfg in &metadata.configuration {
            if cfg.node_id == local_id {
                continue;
            }

            let node = Node::new(cfg.node_id, cfg.addr.clone());
            let added = if cfg.voting {
                engine.add_voting_node(node)
            } else {
                engine.add_non_voting_node(node)
            };
            if let Err(e) = added {
                error!(node_id = cfg.node_id, error = %e, "Failed to add node from snapshot");
                continue;
            }

            if let Err(e) = engine.set_node_active(cfg.node_id, cfg.active) {
                error!(node_id = cfg.node_id, error = %e, "Failed to set node activity");
            }

            debug!(
                node_id = cfg.node_id,
                addr = %cfg.addr,
                voting = cfg.voting,
                active = cfg.active,
                "Added node from snapshot"
            );
        }
    }
}

impl<E, H> std::fmt::Debug for SnapshotManager<E, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotManager")
            .field("local_addr", &self.local_addr)
            .field("metadata_key", &self.config.metadata_key)
            .field("in_progress", &self.in_progress.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::snapshot::codec::{CFG, LAST_INCLUDED_INDEX, LAST_INCLUDED_TERM};
    use crate::testing::{MemEngine, MemHost};
    use bytes::Bytes;

    const KEY: &str = "__raft_snapshot__";

    fn manager(engine: MemEngine, host: MemHost) -> SnapshotManager<MemEngine, MemHost> {
        SnapshotManager::new(
            Arc::new(Mutex::new(engine)),
            crate::host::shared(host),
            NodeAddr::new("local", 5001),
            SnapshotConfig::default(),
            Arc::new(LayerMetrics::new()),
        )
    }

    fn field_str(host: &MemHost, field: &str) -> Option<String> {
        host.field(KEY, field)
            .map(|v| String::from_utf8(v.to_vec()).unwrap())
    }

    #[test]
    fn test_perform_snapshot_persists_metadata() {
        let mut engine = MemEngine::new(1);
        engine.set_term(3);
        engine.append_entries(10);
        engine.commit(8);
        engine.add_member(2, NodeAddr::new("n2", 5002), true, true);
        let mgr = manager(engine, MemHost::new());

        let metadata = mgr.perform_snapshot().unwrap();
        assert_eq!(metadata.last_included_term, 3);
        assert_eq!(metadata.last_included_index, 8);

        let host = mgr.host().lock();
        assert_eq!(field_str(&host, LAST_INCLUDED_TERM).as_deref(), Some("3"));
        assert_eq!(field_str(&host, LAST_INCLUDED_INDEX).as_deref(), Some("8"));
        assert_eq!(
            field_str(&host, CFG).as_deref(),
            Some("1,1,1,local:5001;2,1,1,n2:5002")
        );
        drop(host);

        let engine = mgr.engine().lock();
        assert_eq!(engine.snapshot_index(), 8);
        assert!(!mgr.is_in_progress());
        assert_eq!(mgr.metrics().snapshots_created.get(), 1);
    }

    #[test]
    fn test_perform_snapshot_nothing_to_compact() {
        let mut host = MemHost::new();
        host.set_raw_fields(KEY, &[(LAST_INCLUDED_TERM, "1"), (LAST_INCLUDED_INDEX, "5")]);
        let mgr = manager(MemEngine::new(1), host);

        let result = mgr.perform_snapshot();
        assert!(matches!(
            result,
            Err(Error::Snapshot(SnapshotError::NothingToCompact))
        ));

        // Record untouched.
        let host = mgr.host().lock();
        assert_eq!(field_str(&host, LAST_INCLUDED_INDEX).as_deref(), Some("5"));
        assert!(field_str(&host, CFG).is_none());
        assert_eq!(host.write_count(), 0);
        drop(host);
        assert!(!mgr.is_in_progress());
    }

    #[test]
    fn test_perform_snapshot_while_loading() {
        let mut engine = MemEngine::new(1);
        engine.append_entries(4);
        engine.commit(4);
        let mgr = manager(engine, MemHost::new());

        assert!(mgr.begin_background_load());
        assert!(matches!(
            mgr.perform_snapshot(),
            Err(Error::Snapshot(SnapshotError::NothingToCompact))
        ));
        assert_eq!(mgr.host().lock().write_count(), 0);

        mgr.end_background_load();
        mgr.perform_snapshot().unwrap();
    }

    #[test]
    #[should_panic(expected = "failed to persist snapshot metadata")]
    fn test_perform_snapshot_persist_failure_is_fatal() {
        let mut engine = MemEngine::new(1);
        engine.append_entries(4);
        engine.commit(4);
        let mut host = MemHost::new();
        host.fail_writes(true);
        let mgr = manager(engine, host);

        let _ = mgr.perform_snapshot();
    }

    #[test]
    fn test_load_snapshot_replaces_registry() {
        let mut engine = MemEngine::new(1);
        engine.add_member(2, NodeAddr::new("old2", 6002), true, true);
        engine.add_member(9, NodeAddr::new("old9", 6009), true, true);

        let mut host = MemHost::new();
        host.set_raw_fields(
            KEY,
            &[
                (CFG, "1,1,1,local:5001;2,1,1,n2:5002;3,0,0,n3:5003"),
                (LAST_INCLUDED_INDEX, "40"),
                (LAST_INCLUDED_TERM, "6"),
            ],
        );
        let mgr = manager(engine, host);

        let metadata = mgr.load_snapshot().unwrap();
        assert_eq!(metadata.last_included_index, 40);

        let engine = mgr.engine().lock();
        let mut ids: Vec<_> = engine.members().iter().map(|m| m.id).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2, 3]);

        let n2 = engine.node(2).unwrap();
        assert_eq!(n2.addr(), &NodeAddr::new("n2", 5002));
        let n3 = engine.member(3).unwrap();
        assert!(!n3.active);
        assert!(!n3.voting_committed);

        assert_eq!(engine.snapshot_index(), 40);
        assert_eq!(engine.current_term(), 6);
        assert_eq!(engine.released_connections(), 2);
    }

    #[test]
    fn test_load_snapshot_corrupt_metadata_leaves_state() {
        let mut engine = MemEngine::new(1);
        engine.add_member(2, NodeAddr::new("old2", 6002), true, true);

        let mut host = MemHost::new();
        host.set_raw_fields(
            KEY,
            &[
                (LAST_INCLUDED_TERM, "six"),
                (LAST_INCLUDED_INDEX, "40"),
                (CFG, "1,1,1,local:5001"),
            ],
        );
        let mgr = manager(engine, host);

        assert!(matches!(
            mgr.load_snapshot(),
            Err(Error::Snapshot(SnapshotError::CorruptMetadata(_)))
        ));

        let engine = mgr.engine().lock();
        assert!(engine.node(2).is_some());
        assert!(!engine.load_begun());
    }

    #[test]
    fn test_load_snapshot_corrupt_config_leaves_state() {
        let mut engine = MemEngine::new(1);
        engine.add_member(2, NodeAddr::new("old2", 6002), true, true);

        let mut host = MemHost::new();
        host.set_raw_fields(
            KEY,
            &[
                (LAST_INCLUDED_TERM, "6"),
                (LAST_INCLUDED_INDEX, "40"),
                (CFG, "1,1,1,local:5001;2,1,n2:5002"),
            ],
        );
        let mgr = manager(engine, host);

        assert!(matches!(
            mgr.load_snapshot(),
            Err(Error::Snapshot(SnapshotError::CorruptConfigEntry(_)))
        ));
        assert!(mgr.engine().lock().node(2).is_some());
    }

    #[test]
    fn test_load_snapshot_wrong_type_is_corrupt() {
        let mut host = MemHost::new();
        host.set_string(KEY, Bytes::from_static(b"not a hash"));
        let mgr = manager(MemEngine::new(1), host);

        assert!(matches!(
            mgr.load_snapshot(),
            Err(Error::Snapshot(SnapshotError::CorruptMetadata(_)))
        ));
        assert_eq!(
            mgr.host().lock().string(KEY),
            Some(Bytes::from_static(b"not a hash"))
        );
    }

    #[test]
    fn test_load_snapshot_empty_config_leaves_state() {
        let mut engine = MemEngine::new(1);
        engine.add_member(2, NodeAddr::new("n2", 5002), true, true);

        let mut host = MemHost::new();
        host.set_raw_fields(
            KEY,
            &[(LAST_INCLUDED_TERM, "3"), (LAST_INCLUDED_INDEX, "40"), (CFG, "")],
        );
        let mgr = manager(engine, host);

        assert!(matches!(
            mgr.load_snapshot(),
            Err(Error::Snapshot(SnapshotError::CorruptMetadata(_)))
        ));

        let engine = mgr.engine().lock();
        assert!(engine.node(2).is_some());
        assert!(!engine.load_begun());
        drop(engine);
        assert!(!mgr.is_in_progress());
    }

    #[test]
    fn test_load_snapshot_while_slot_held() {
        let mut engine = MemEngine::new(1);
        engine.add_member(2, NodeAddr::new("old2", 6002), true, true);

        let mut host = MemHost::new();
        host.set_raw_fields(
            KEY,
            &[(LAST_INCLUDED_TERM, "6"), (LAST_INCLUDED_INDEX, "40"), (CFG, "1,1,1,local:5001")],
        );
        let mgr = manager(engine, host);

        assert!(mgr.begin_background_load());
        assert!(matches!(
            mgr.load_snapshot(),
            Err(Error::Snapshot(SnapshotError::InProgress))
        ));
        assert!(mgr.engine().lock().node(2).is_some());
        assert!(mgr.is_in_progress());

        mgr.end_background_load();
        mgr.load_snapshot().unwrap();
        assert!(mgr.engine().lock().node(2).is_none());
        assert!(!mgr.is_in_progress());
    }

    #[test]
    fn test_load_snapshot_stale() {
        let mut engine = MemEngine::new(1);
        engine.append_entries(50);
        engine.commit(50);
        engine.add_member(2, NodeAddr::new("old2", 6002), true, true);

        let mut host = MemHost::new();
        host.set_raw_fields(
            KEY,
            &[
                (LAST_INCLUDED_TERM, "1"),
                (LAST_INCLUDED_INDEX, "40"),
                (CFG, "1,1,1,local:5001"),
            ],
        );
        let mgr = manager(engine, host);

        assert!(matches!(
            mgr.load_snapshot(),
            Err(Error::Snapshot(SnapshotError::StaleSnapshot { index: 40, .. }))
        ));
        assert!(mgr.engine().lock().node(2).is_some());
    }
}
