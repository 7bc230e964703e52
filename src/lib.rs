//! Snapshot and log-access layer binding a Raft engine to a key-value host.
//!
//! The consensus engine (leader election, replication, node registry) and the
//! host store (keyspace, primary/replica replication) are external. This
//! crate supplies what sits between them:
//!
//! - **Snapshots**: metadata persisted as a keyspace record, log compaction,
//!   and loading a snapshot after the host pulled a full dataset
//! - **Load handshake**: waits for the host's state transfer before loading
//! - **Entry cache**: ring buffer of recent log entries with a byte budget
//! - **Forwarding**: followers relay client commands to the leader
//!
//! # Example
//!
//! ```rust,ignore
//! use kvraft_snapshot::{LayerConfig, LayerMetrics, LoadHandshake, NodeAddr, SnapshotManager};
//! use parking_lot::Mutex;
//! use std::sync::Arc;
//!
//! let config = LayerConfig::new(1, "10.0.0.1:5001".parse()?);
//! config.validate()?;
//!
//! let manager = Arc::new(SnapshotManager::new(
//!     Arc::new(Mutex::new(engine)),
//!     kvraft_snapshot::host::shared(host),
//!     config.addr.clone(),
//!     config.snapshot.clone(),
//!     Arc::new(LayerMetrics::new()),
//! ));
//!
//! // COMPACT
//! manager.perform_snapshot()?;
//!
//! // LOADSNAPSHOT, then poll from the background
//! let handshake = Arc::new(LoadHandshake::new(manager));
//! handshake.load_from(&"10.0.0.2:5002".parse()?)?;
//! tokio::spawn(handshake.clone().run_poll_loop(config.snapshot.poll_interval, shutdown_rx));
//! ```
//!
//! # Architecture
//!
//! ```text
//!          admin commands                      client commands (follower)
//!                │                                      │
//!                ▼                                      ▼
//! ┌──────────────────────────────┐         ┌────────────────────────┐
//! │ SnapshotManager              │         │ LeaderForwarder        │
//! │  perform_snapshot            │         │  RAFT.ENTRY → leader   │
//! │  load_snapshot ◄─ handshake  │         │  reply translation     │
//! └──────────────────────────────┘         └────────────────────────┘
//!        │                 │
//!        ▼                 ▼
//! ┌─────────────┐   ┌─────────────┐        ┌────────────────────────┐
//! │ Consensus   │   │ HostStore   │        │ CachedLog              │
//! │ Engine      │   │ (keyspace)  │        │  EntryCache + LogStore │
//! └─────────────┘   └─────────────┘        └────────────────────────┘
//! ```
//!
//! # Locking
//!
//! The engine and the host each sit behind a `parking_lot::Mutex`. When both
//! are needed the engine is locked first.

pub mod commands;
pub mod config;
pub mod consensus;
pub mod error;
pub mod host;
pub mod metrics;
pub mod proxy;
pub mod snapshot;
pub mod testing;
pub mod types;

pub use commands::AdminCommand;
pub use config::{EntryCacheConfig, ForwardingConfig, LayerConfig, SnapshotConfig};
pub use consensus::{CachedLog, ConsensusEngine, EntryCache, LogStore, MemLogStore, Node};
pub use error::{Error, Result};
pub use host::{HostStore, ReplicationStatus, SharedHost};
pub use metrics::LayerMetrics;
pub use proxy::{ClientReply, CommandBatch, LeaderForwarder, LeaderLink, LeaderReply};
pub use snapshot::{DirectiveOutcome, LoadHandshake, PollOutcome, SnapshotManager};
pub use types::{NodeAddr, NodeId, SnapshotCfgEntry, SnapshotMetadata};
