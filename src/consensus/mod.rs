//! Consensus-side pieces: the engine interface, the entry cache and the
//! cached log built on it.

pub mod engine;
pub mod entry_cache;
pub mod log;

pub use engine::{ConnectionState, ConsensusEngine, MemberInfo, Node};
pub use entry_cache::{entry_size, EntryCache};
pub use log::{CachedLog, LogStore, MemLogStore};
