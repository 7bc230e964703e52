//! Durable log access with the entry cache in front of it.

use crate::config::EntryCacheConfig;
use crate::consensus::entry_cache::EntryCache;
use crate::error::LogError;
use crate::metrics::LayerMetrics;
use raft::prelude::{Entry, EntryType};
use std::sync::Arc;
use tracing::debug;

/// Durable storage for log entries.
pub trait LogStore: Send + 'static {
    /// First index still held (the entry after the compaction boundary).
    fn first_index(&self) -> u64;

    /// Last index held, or the compaction boundary when empty.
    fn last_index(&self) -> u64;

    /// Entry at `index`.
    fn entry(&self, index: u64) -> Result<Entry, LogError>;

    /// Append contiguous entries, replacing any overlapping suffix.
    fn append(&mut self, entries: &[Entry]) -> Result<(), LogError>;

    /// Remove every entry with index `>= index`.
    fn truncate_from(&mut self, index: u64) -> Result<(), LogError>;

    /// Discard every entry up to and including `index`.
    fn compact(&mut self, index: u64) -> Result<(), LogError>;
}

/// In-memory log store.
///
/// `entries[0]` is always a dummy entry at the compaction boundary. The
/// entry at logical index `i` lives at position `i - entries[0].index`.
#[derive(Debug, Clone)]
pub struct MemLogStore {
    entries: Vec<Entry>,
}

impl MemLogStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: vec![Entry::default()],
        }
    }

    /// Index of the dummy entry.
    pub fn compacted_index(&self) -> u64 {
        self.entries.first().map(|e| e.index).unwrap_or(0)
    }

    /// Number of entries held, not counting the dummy.
    pub fn entry_count(&self) -> usize {
        self.entries.len().saturating_sub(1)
    }
}

impl Default for MemLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LogStore for MemLogStore {
    fn first_index(&self) -> u64 {
        self.compacted_index() + 1
    }

    fn last_index(&self) -> u64 {
        self.entries
            .last()
            .map(|e| e.index)
            .unwrap_or_else(|| self.compacted_index())
    }

    fn entry(&self, index: u64) -> Result<Entry, LogError> {
        let compacted = self.compacted_index();
        if index <= compacted {
            return Err(LogError::Compacted(compacted));
        }
        if index > self.last_index() {
            return Err(LogError::EntryNotFound(index));
        }
        Ok(self.entries[(index - compacted) as usize].clone())
    }

    fn append(&mut self, entries: &[Entry]) -> Result<(), LogError> {
        if entries.is_empty() {
            return Ok(());
        }

        let compacted = self.compacted_index();
        let first_index = self.first_index();
        let last_index = self.last_index();
        let first_new = entries[0].index;

        if first_new < first_index {
            return Err(LogError::Compacted(compacted));
        }
        if first_new > last_index + 1 {
            return Err(LogError::LogGap {
                last_index,
                first_new,
            });
        }
        for pair in entries.windows(2) {
            if pair[1].index != pair[0].index + 1 {
                return Err(LogError::NonContiguous {
                    prev_index: pair[0].index,
                    curr_index: pair[1].index,
                });
            }
        }

        if first_new <= last_index {
            self.entries.truncate((first_new - compacted) as usize);
        }
        self.entries.extend_from_slice(entries);

        Ok(())
    }

    fn truncate_from(&mut self, index: u64) -> Result<(), LogError> {
        let compacted = self.compacted_index();
        if index <= compacted {
            return Err(LogError::Compacted(compacted));
        }
        if index <= self.last_index() {
            self.entries.truncate((index - compacted) as usize);
        }
        Ok(())
    }

    fn compact(&mut self, index: u64) -> Result<(), LogError> {
        let compacted = self.compacted_index();
        if index <= compacted {
            return Ok(());
        }
        if index > self.last_index() {
            return Err(LogError::EntryNotFound(index));
        }

        let skip = (index - compacted) as usize;
        let term = self.entries[skip].term;
        self.entries.drain(..skip);

        if let Some(dummy) = self.entries.first_mut() {
            dummy.index = index;
            dummy.term = term;
            dummy.entry_type = EntryType::EntryNormal;
            dummy.data.clear();
            dummy.context.clear();
        }

        Ok(())
    }
}

/// Log reads and writes through the entry cache.
///
/// The cache holds a window of the most recent entries, shared by `Arc` with
/// whoever reads them. Reads outside the window go to the store.
pub struct CachedLog<S> {
    store: S,
    cache: EntryCache,
    max_bytes: usize,
    metrics: Arc<LayerMetrics>,
}

impl<S: LogStore> CachedLog<S> {
    /// Put a cache sized by `config` in front of `store`.
    pub fn new(store: S, config: &EntryCacheConfig, metrics: Arc<LayerMetrics>) -> Self {
        Self {
            store,
            cache: EntryCache::new(config.initial_capacity),
            max_bytes: config.max_bytes,
            metrics,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The entry cache.
    pub fn cache(&self) -> &EntryCache {
        &self.cache
    }

    /// First index held by the store.
    pub fn first_index(&self) -> u64 {
        self.store.first_index()
    }

    /// Last index held by the store.
    pub fn last_index(&self) -> u64 {
        self.store.last_index()
    }

    /// Append entries to the store and the cache.
    ///
    /// An append that overlaps the cached window replaces its tail. The
    /// cache is compacted to its byte budget afterwards.
    pub fn append(&mut self, entries: Vec<Entry>) -> Result<(), LogError> {
        let Some(first_new) = entries.first().map(|e| e.index) else {
            return Ok(());
        };

        self.store.append(&entries)?;

        if first_new < self.cache.start_index() || first_new > self.cache.next_index() {
            // Window no longer adjacent to the new entries.
            self.cache.clear();
        } else if first_new < self.cache.next_index() {
            self.cache.delete_tail(first_new);
        }

        for entry in entries {
            let index = entry.index;
            self.cache.append(Arc::new(entry), index);
        }

        let evicted = self.cache.compact(self.max_bytes);
        self.metrics.cache_evictions.inc_by(evicted as u64);
        self.update_gauge();

        Ok(())
    }

    /// Entry at `index`, from the cache if present.
    pub fn entry(&self, index: u64) -> Result<Arc<Entry>, LogError> {
        if let Some(entry) = self.cache.get(index) {
            self.metrics.cache_hits.inc();
            return Ok(entry);
        }

        self.metrics.cache_misses.inc();
        self.store.entry(index).map(Arc::new)
    }

    /// Entries in `[lo, hi)`.
    pub fn entries(&self, lo: u64, hi: u64) -> Result<Vec<Arc<Entry>>, LogError> {
        (lo..hi).map(|i| self.entry(i)).collect()
    }

    /// Remove every entry with index `>= index`.
    pub fn truncate_from(&mut self, index: u64) -> Result<(), LogError> {
        self.store.truncate_from(index)?;
        self.cache.delete_tail(index);
        self.update_gauge();
        Ok(())
    }

    /// Discard every entry up to and including `index`.
    pub fn compact(&mut self, index: u64) -> Result<(), LogError> {
        self.store.compact(index)?;
        let evicted = self.cache.delete_head(index + 1);
        self.metrics.cache_evictions.inc_by(evicted as u64);
        self.update_gauge();
        debug!(index, first_index = self.store.first_index(), "Log compacted");
        Ok(())
    }

    fn update_gauge(&self) {
        self.metrics
            .cache_bytes
            .set(self.cache.bytes_cached() as i64);
    }
}

impl<S> std::fmt::Debug for CachedLog<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedLog")
            .field("cache", &self.cache)
            .field("max_bytes", &self.max_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: u64, term: u64, data: &[u8]) -> Entry {
        let mut e = Entry::default();
        e.index = index;
        e.term = term;
        e.data = data.to_vec().into();
        e
    }

    fn entries(range: std::ops::RangeInclusive<u64>, term: u64) -> Vec<Entry> {
        range.map(|i| entry(i, term, b"0123456789")).collect()
    }

    fn cached_log(max_bytes: usize) -> CachedLog<MemLogStore> {
        CachedLog::new(
            MemLogStore::new(),
            &EntryCacheConfig::new(4, max_bytes),
            Arc::new(LayerMetrics::new()),
        )
    }

    #[test]
    fn test_store_append_and_gap() {
        let mut store = MemLogStore::new();
        store.append(&entries(1..=3, 1)).unwrap();
        assert_eq!(store.first_index(), 1);
        assert_eq!(store.last_index(), 3);

        assert!(matches!(
            store.append(&entries(5..=6, 1)),
            Err(LogError::LogGap { last_index: 3, first_new: 5 })
        ));
        assert!(matches!(
            store.append(&[entry(4, 1, b""), entry(6, 1, b"")]),
            Err(LogError::NonContiguous { prev_index: 4, curr_index: 6 })
        ));
    }

    #[test]
    fn test_store_overlap_replaces_suffix() {
        let mut store = MemLogStore::new();
        store.append(&entries(1..=5, 1)).unwrap();
        store.append(&entries(3..=4, 2)).unwrap();

        assert_eq!(store.last_index(), 4);
        assert_eq!(store.entry(3).unwrap().term, 2);
        assert_eq!(store.entry(2).unwrap().term, 1);
    }

    #[test]
    fn test_store_compact() {
        let mut store = MemLogStore::new();
        store.append(&entries(1..=5, 1)).unwrap();
        store.compact(3).unwrap();

        assert_eq!(store.compacted_index(), 3);
        assert_eq!(store.first_index(), 4);
        assert_eq!(store.entry_count(), 2);
        assert!(matches!(store.entry(2), Err(LogError::Compacted(3))));
        assert!(matches!(store.compact(9), Err(LogError::EntryNotFound(9))));

        // Idempotent.
        store.compact(2).unwrap();
        assert_eq!(store.compacted_index(), 3);
    }

    #[test]
    fn test_reads_hit_cache() {
        let mut log = cached_log(1024);
        log.append(entries(1..=3, 1)).unwrap();

        let a = log.entry(2).unwrap();
        let b = log.entry(2).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(log.metrics.cache_hits.get(), 2);
        assert_eq!(log.metrics.cache_misses.get(), 0);
    }

    #[test]
    fn test_budget_evicts_to_store() {
        // Each entry is 10 bytes; budget fits two.
        let mut log = cached_log(20);
        log.append(entries(1..=5, 1)).unwrap();

        assert_eq!(log.cache().len(), 2);
        assert_eq!(log.cache().start_index(), 4);
        assert_eq!(log.metrics.cache_evictions.get(), 3);
        assert_eq!(log.metrics.cache_bytes.get(), 20);

        let e = log.entry(1).unwrap();
        assert_eq!(e.index, 1);
        assert_eq!(log.metrics.cache_misses.get(), 1);
    }

    #[test]
    fn test_overwrite_tail() {
        let mut log = cached_log(1024);
        log.append(entries(1..=5, 1)).unwrap();
        log.append(entries(4..=6, 2)).unwrap();

        assert_eq!(log.last_index(), 6);
        assert_eq!(log.cache().next_index(), 7);
        assert_eq!(log.entry(4).unwrap().term, 2);
        assert_eq!(log.entry(3).unwrap().term, 1);
    }

    #[test]
    fn test_overwrite_below_window_resets_cache() {
        let mut log = cached_log(20);
        log.append(entries(1..=5, 1)).unwrap();
        assert_eq!(log.cache().start_index(), 4);

        log.append(entries(2..=3, 3)).unwrap();
        assert_eq!(log.cache().start_index(), 2);
        assert_eq!(log.cache().next_index(), 4);
        assert_eq!(log.entry(3).unwrap().term, 3);
        assert_eq!(log.last_index(), 3);
    }

    #[test]
    fn test_truncate_and_compact_stay_in_step() {
        let mut log = cached_log(1024);
        log.append(entries(1..=6, 1)).unwrap();

        log.truncate_from(5).unwrap();
        assert_eq!(log.last_index(), 4);
        assert_eq!(log.cache().next_index(), 5);

        log.compact(2).unwrap();
        assert_eq!(log.first_index(), 3);
        assert_eq!(log.cache().start_index(), 3);
        assert!(log.entry(2).is_err());

        let range = log.entries(3, 5).unwrap();
        assert_eq!(range.iter().map(|e| e.index).collect::<Vec<_>>(), vec![3, 4]);

        log.append(entries(5..=5, 2)).unwrap();
        assert_eq!(log.cache().len(), 3);
    }
}
