//! Replication handshake that gates snapshot loading.
//!
//! ```text
//!   Idle ──load_from(src)──► AwaitingSync ──poll: link up, sync done──► Load ──► Idle
//!    ▲         │ host rejects                    │ poll: not done yet
//!    └─────────┘ (dropped)                       └──► AwaitingSync
//! ```
//!
//! There is no deadline on `AwaitingSync`. A source that never finishes the
//! transfer keeps the node waiting until a new directive or restart.

use crate::consensus::ConsensusEngine;
use crate::error::{Result, SnapshotError};
use crate::host::{HostStore, ReplicationStatus};
use crate::snapshot::manager::SnapshotManager;
use crate::types::{NodeAddr, SnapshotMetadata};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Handshake state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    /// No load pending.
    Idle,
    /// Replicating from `source`, waiting for the transfer to finish.
    AwaitingSync {
        /// Node the dataset is pulled from.
        source: NodeAddr,
    },
}

/// Result of a load directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveOutcome {
    /// The host started replicating.
    Accepted,
    /// The host refused to replicate. Nothing changed.
    Dropped,
}

/// Result of a single poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// No load pending.
    Idle,
    /// Transfer still running.
    Syncing,
    /// Transfer finished and the snapshot was loaded.
    Loaded(SnapshotMetadata),
    /// Transfer finished but the load failed. The handshake is idle again.
    LoadFailed,
}

/// Drives a snapshot load through the host's replication.
pub struct LoadHandshake<E, H> {
    manager: Arc<SnapshotManager<E, H>>,
    state: Mutex<HandshakeState>,
}

impl<E: ConsensusEngine, H: HostStore> LoadHandshake<E, H> {
    /// Create an idle handshake.
    pub fn new(manager: Arc<SnapshotManager<E, H>>) -> Self {
        Self {
            manager,
            state: Mutex::new(HandshakeState::Idle),
        }
    }

    /// The snapshot manager the load runs through.
    pub fn manager(&self) -> &Arc<SnapshotManager<E, H>> {
        &self.manager
    }

    /// Current state.
    pub fn state(&self) -> HandshakeState {
        self.state.lock().clone()
    }

    /// Start pulling the dataset from `source`.
    ///
    /// A directive received while already waiting re-targets the host at the
    /// new source. Fails with `InProgress` if a snapshot create holds the
    /// snapshot slot.
    pub fn load_from(&self, source: &NodeAddr) -> Result<DirectiveOutcome> {
        let mut state = self.state.lock();

        let claimed = match &*state {
            HandshakeState::AwaitingSync { .. } => false,
            HandshakeState::Idle => {
                if !self.manager.begin_background_load() {
                    debug!(source = %source, "Snapshot operation already active, refusing load");
                    return Err(SnapshotError::InProgress.into());
                }
                true
            }
        };

        let replicated = {
            let mut host = self.manager.host().lock();
            host.replicate_from(source)
        };

        if let Err(e) = replicated {
            // Silent drop; the requester is not told.
            warn!(source = %source, error = %e, "Host refused to replicate, dropping load directive");
            self.manager.metrics().handshakes_dropped.inc();
            if claimed {
                self.manager.end_background_load();
            }
            return Ok(DirectiveOutcome::Dropped);
        }

        info!(source = %source, "Replicating snapshot from source");
        self.manager.metrics().handshakes_started.inc();
        *state = HandshakeState::AwaitingSync {
            source: source.clone(),
        };

        Ok(DirectiveOutcome::Accepted)
    }

    /// Check the transfer once and load the snapshot if it finished.
    ///
    /// A report that cannot be parsed fails this poll only; the handshake
    /// keeps waiting.
    pub fn poll(&self) -> Result<PollOutcome> {
        let mut state = self.state.lock();

        let source = match &*state {
            HandshakeState::Idle => return Ok(PollOutcome::Idle),
            HandshakeState::AwaitingSync { source } => source.clone(),
        };

        let report = {
            let mut host = self.manager.host().lock();
            host.replication_report()?
        };

        let status = match ReplicationStatus::parse(&report) {
            Ok(status) => status,
            Err(e) => {
                error!(error = %e, "Failed to parse replication report");
                return Err(e.into());
            }
        };

        if !status.is_complete() {
            debug!(
                source = %source,
                link_up = status.link_up,
                sync_in_progress = status.sync_in_progress,
                "Snapshot transfer not finished"
            );
            return Ok(PollOutcome::Syncing);
        }

        info!(source = %source, "Snapshot transfer finished, loading");

        let detached = {
            let mut host = self.manager.host().lock();
            host.detach_replica()
        };
        if let Err(e) = detached {
            error!(error = %e, "Failed to detach from replication source");
        }

        let outcome = match self.manager.install_snapshot() {
            Ok(metadata) => PollOutcome::Loaded(metadata),
            Err(e) => {
                error!(source = %source, error = %e, "Snapshot load failed");
                PollOutcome::LoadFailed
            }
        };

        *state = HandshakeState::Idle;
        self.manager.end_background_load();

        Ok(outcome)
    }

    /// Poll every `interval` until `shutdown_rx` fires.
    pub async fn run_poll_loop(self: Arc<Self>, interval: Duration, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll() {
                        warn!(error = %e, "Snapshot load poll failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Snapshot load poller shutting down");
                    break;
                }
            }
        }
    }
}

impl<E, H> std::fmt::Debug for LoadHandshake<E, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadHandshake")
            .field("state", &*self.state.lock())
            .finish()
    }
}
