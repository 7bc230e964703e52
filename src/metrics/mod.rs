//! Counters and gauges for the snapshot layer.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                     LayerMetrics                        │
//! │  snapshots: created / failed / loaded / load_failed     │
//! │  handshake: started / dropped                           │
//! │  entry cache: hits / misses / evictions / bytes         │
//! │  forwarding: sent / timeouts / bad replies              │
//! └────────────────────────────────────────────────────────┘
//! ```

mod counters;
mod gauges;

pub use counters::Counter;
pub use gauges::Gauge;

/// All metrics recorded by the snapshot layer.
#[derive(Debug)]
pub struct LayerMetrics {
    /// Snapshots created.
    pub snapshots_created: Counter,
    /// Snapshot create requests that found nothing to compact.
    pub snapshots_failed: Counter,
    /// Snapshots loaded after a state transfer.
    pub snapshots_loaded: Counter,
    /// Snapshot loads aborted.
    pub snapshot_loads_failed: Counter,
    /// Load handshakes that entered `AwaitingSync`.
    pub handshakes_started: Counter,
    /// Load directives dropped by the host.
    pub handshakes_dropped: Counter,
    /// Entry cache hits.
    pub cache_hits: Counter,
    /// Entry cache misses.
    pub cache_misses: Counter,
    /// Entries evicted from the entry cache.
    pub cache_evictions: Counter,
    /// Bytes currently held by the entry cache.
    pub cache_bytes: Gauge,
    /// Commands forwarded to the leader.
    pub forwards_sent: Counter,
    /// Forwarded commands that lost their connection before a reply.
    pub forward_timeouts: Counter,
    /// Leader replies that could not be translated.
    pub forward_bad_replies: Counter,
}

impl LayerMetrics {
    /// Create a new metrics registry.
    pub fn new() -> Self {
        Self {
            snapshots_created: Counter::new("snapshots_created_total"),
            snapshots_failed: Counter::new("snapshots_failed_total"),
            snapshots_loaded: Counter::new("snapshots_loaded_total"),
            snapshot_loads_failed: Counter::new("snapshot_loads_failed_total"),
            handshakes_started: Counter::new("load_handshakes_started_total"),
            handshakes_dropped: Counter::new("load_handshakes_dropped_total"),
            cache_hits: Counter::new("entry_cache_hits_total"),
            cache_misses: Counter::new("entry_cache_misses_total"),
            cache_evictions: Counter::new("entry_cache_evictions_total"),
            cache_bytes: Gauge::new("entry_cache_bytes"),
            forwards_sent: Counter::new("leader_forwards_total"),
            forward_timeouts: Counter::new("leader_forward_timeouts_total"),
            forward_bad_replies: Counter::new("leader_forward_bad_replies_total"),
        }
    }

    /// Entry cache hit rate in `[0, 1]`, or 0 with no lookups.
    pub fn cache_hit_rate(&self) -> f64 {
        let hits = self.cache_hits.get();
        let total = hits + self.cache_misses.get();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

impl Default for LayerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
