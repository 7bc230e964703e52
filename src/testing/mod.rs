//! In-memory fakes for the engine, the host store and the leader link.
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌────────────────────┐
//! │  MemEngine   │   │   MemHost    │   │ ChannelLeaderLink  │
//! │  registry,   │   │  keyspace,   │   │ requests → mpsc    │
//! │  snapshot    │   │  scripted    │   │ ready toggle       │
//! │  bookkeeping │   │  replication │   │                    │
//! └──────────────┘   └──────────────┘   └────────────────────┘
//! ```

mod leader_link;
mod mem_engine;
mod mem_host;


pub use leader_link::ChannelLeaderLink;
pub use mem_engine::MemEngine;
pub use mem_host::MemHost;

/// Install a tracing subscriber for a test. Safe to call more than once.
#[cfg(test)]
pub(crate) fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}
