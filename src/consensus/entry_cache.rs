//! In-memory cache of recently appended Raft log entries.
//!
//! The cache keeps a contiguous window `[start_index, start_index + len)` of
//! log entries in a growable ring buffer. Entries are shared with the durable
//! log store through `Arc`, so evicting an entry only drops the cache's
//! reference.
//!
//! # Index Mapping
//! `slots[start]` holds the entry at `start_index`. The entry at logical
//! index `i` lives at ring position `(start + (i - start_index)) % capacity`.
//!
//! # Invariants
//! - `len <= capacity`
//! - `start_index` only moves forward, except on [`EntryCache::clear`]
//! - `bytes_cached` equals the summed payload size of the cached entries
//!
//! The cache does no locking of its own; callers serialize access.

use raft::prelude::Entry;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Payload size charged against the cache budget for one entry.
#[inline]
pub fn entry_size(entry: &Entry) -> usize {
    entry.data.len() + entry.context.len()
}

/// Ring buffer of shared log entries with byte accounting.
pub struct EntryCache {
    /// Ring storage. Occupied slots are exactly the `len` slots starting at `start`.
    slots: Vec<Option<Arc<Entry>>>,

    /// Ring position of the oldest cached entry.
    start: usize,

    /// Log index of the oldest cached entry.
    start_index: u64,

    /// Whether `start_index` was fixed by an append since `new` or `clear`.
    anchored: bool,

    /// Number of cached entries.
    len: usize,

    /// Summed payload size of the cached entries.
    bytes_cached: usize,
}

impl EntryCache {
    /// Create an empty cache with room for `initial_capacity` entries.
    pub fn new(initial_capacity: usize) -> Self {
        let capacity = initial_capacity.max(1);
        Self {
            slots: vec![None; capacity],
            start: 0,
            start_index: 0,
            anchored: false,
            len: 0,
            bytes_cached: 0,
        }
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots in the ring buffer.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Log index of the oldest cached entry.
    pub fn start_index(&self) -> u64 {
        self.start_index
    }

    /// The only index [`EntryCache::append`] accepts next.
    pub fn next_index(&self) -> u64 {
        self.start_index + self.len as u64
    }

    /// Summed payload size of the cached entries.
    pub fn bytes_cached(&self) -> usize {
        self.bytes_cached
    }

    /// Append `entry` at log index `index`.
    ///
    /// The first append into a fresh (or cleared) cache fixes the window
    /// start. After that only `next_index()` is accepted.
    ///
    /// # Panics
    /// Panics if `index` is not contiguous with the cached window. A gap means
    /// the log-access path is broken, and serving entries from such a cache
    /// would hand out the wrong data.
    pub fn append(&mut self, entry: Arc<Entry>, index: u64) {
        if !self.anchored {
            self.start_index = index;
            self.anchored = true;
        }

        assert_eq!(
            index,
            self.next_index(),
            "non-contiguous entry cache append: start_index={}, len={}",
            self.start_index,
            self.len
        );

        if self.len == self.capacity() {
            self.grow();
        }

        let pos = self.ring_pos(self.len);
        self.bytes_cached += entry_size(&entry);
        self.slots[pos] = Some(entry);
        self.len += 1;
    }

    /// Get the entry at `index`, or `None` on a cache miss.
    pub fn get(&self, index: u64) -> Option<Arc<Entry>> {
        if index < self.start_index || index >= self.next_index() {
            return None;
        }

        let offset = (index - self.start_index) as usize;
        self.slots[self.ring_pos(offset)].clone()
    }

    /// Evict entries with index in `[start_index, upto)`.
    ///
    /// Returns the number of entries evicted.
    pub fn delete_head(&mut self, upto: u64) -> usize {
        if upto <= self.start_index {
            return 0;
        }

        let count = ((upto - self.start_index) as usize).min(self.len);
        for _ in 0..count {
            self.evict_head();
        }

        if count > 0 {
            debug!(
                evicted = count,
                start_index = self.start_index,
                bytes_cached = self.bytes_cached,
                "Entry cache head evicted"
            );
        }
        count
    }

    /// Evict entries with index in `[from, next_index())`, newest first.
    ///
    /// Used when uncommitted tail entries are overwritten after a leader
    /// change. Returns the number of entries evicted.
    pub fn delete_tail(&mut self, from: u64) -> usize {
        let end = self.next_index();
        if from >= end {
            return 0;
        }

        let from = from.max(self.start_index);
        let count = (end - from) as usize;
        for _ in 0..count {
            let pos = self.ring_pos(self.len - 1);
            if let Some(entry) = self.slots[pos].take() {
                self.bytes_cached -= entry_size(&entry);
            }
            self.len -= 1;
        }

        debug!(
            evicted = count,
            next_index = self.next_index(),
            bytes_cached = self.bytes_cached,
            "Entry cache tail truncated"
        );
        count
    }

    /// Evict the oldest entries until `bytes_cached <= max_bytes`.
    ///
    /// The newest entry is never evicted, so when it alone exceeds the
    /// budget it stays cached by itself. Returns the number of entries evicted.
    pub fn compact(&mut self, max_bytes: usize) -> usize {
        let mut evicted = 0;
        while self.len > 1 && self.bytes_cached > max_bytes {
            self.evict_head();
            evicted += 1;
        }

        if evicted > 0 {
            debug!(
                evicted,
                max_bytes,
                bytes_cached = self.bytes_cached,
                "Entry cache compacted"
            );
        }
        evicted
    }

    /// Drop every cached entry and forget the window start.
    ///
    /// This is the only operation that may move `start_index` backwards.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.start = 0;
        self.start_index = 0;
        self.anchored = false;
        self.len = 0;
        self.bytes_cached = 0;
    }

    fn evict_head(&mut self) {
        if let Some(entry) = self.slots[self.start].take() {
            self.bytes_cached -= entry_size(&entry);
        }
        self.start = (self.start + 1) % self.capacity();
        self.start_index += 1;
        self.len -= 1;
    }

    /// Double the ring, unrolling the occupied slots to the front.
    fn grow(&mut self) {
        let new_capacity = self.capacity() * 2;
        let mut slots = Vec::with_capacity(new_capacity);
        for offset in 0..self.len {
            let pos = self.ring_pos(offset);
            slots.push(self.slots[pos].take());
        }
        slots.resize(new_capacity, None);

        self.slots = slots;
        self.start = 0;
    }

    #[inline]
    fn ring_pos(&self, offset: usize) -> usize {
        (self.start + offset) % self.capacity()
    }
}

impl Default for EntryCache {
    fn default() -> Self {
        Self::new(512)
    }
}

impl fmt::Debug for EntryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryCache")
            .field("start_index", &self.start_index)
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("bytes_cached", &self.bytes_cached)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn entry(index: u64, size: usize) -> Arc<Entry> {
        let mut e = Entry::default();
        e.index = index;
        e.term = 1;
        e.data = Bytes::from(vec![index as u8; size]);
        Arc::new(e)
    }

    fn filled(first: u64, last: u64, size: usize, capacity: usize) -> EntryCache {
        let mut cache = EntryCache::new(capacity);
        for i in first..=last {
            cache.append(entry(i, size), i);
        }
        cache
    }

    /// Recompute the byte total from scratch and compare with the running one.
    fn assert_accounting(cache: &EntryCache) {
        let expected: usize = (cache.start_index()..cache.next_index())
            .map(|i| entry_size(&cache.get(i).unwrap()))
            .sum();
        assert_eq!(cache.bytes_cached(), expected);
        assert!(cache.len() <= cache.capacity());
    }

    #[test]
    fn test_append_and_get() {
        let cache = filled(1, 10, 8, 4);

        assert_eq!(cache.len(), 10);
        assert_eq!(cache.start_index(), 1);
        assert_eq!(cache.next_index(), 11);
        assert!(cache.capacity() >= 10);

        for i in 1..=10 {
            let e = cache.get(i).unwrap();
            assert_eq!(e.index, i);
            assert_eq!(e.data[0], i as u8);
        }
        assert_eq!(cache.bytes_cached(), 80);
    }

    #[test]
    fn test_get_outside_window_is_miss() {
        let mut cache = filled(5, 9, 4, 8);
        assert!(cache.get(4).is_none());
        assert!(cache.get(10).is_none());

        cache.delete_head(7);
        assert!(cache.get(6).is_none());
        assert!(cache.get(7).is_some());
    }

    #[test]
    #[should_panic(expected = "non-contiguous entry cache append")]
    fn test_append_gap_panics() {
        let mut cache = filled(1, 3, 4, 4);
        cache.append(entry(5, 4), 5);
    }

    #[test]
    #[should_panic(expected = "non-contiguous entry cache append")]
    fn test_append_overlap_panics() {
        let mut cache = filled(1, 3, 4, 4);
        cache.append(entry(3, 4), 3);
    }

    #[test]
    #[should_panic(expected = "non-contiguous entry cache append")]
    fn test_append_after_emptying_tail_at_zero_panics() {
        let mut cache = EntryCache::new(4);
        cache.append(entry(0, 4), 0);
        cache.append(entry(1, 4), 1);
        assert_eq!(cache.delete_tail(0), 2);
        assert!(cache.is_empty());

        cache.append(entry(7, 4), 7);
    }

    #[test]
    fn test_append_after_clear_adopts_index() {
        let mut cache = EntryCache::new(4);
        cache.append(entry(0, 4), 0);
        cache.delete_tail(0);
        cache.append(entry(0, 4), 0);
        assert_eq!(cache.next_index(), 1);

        cache.clear();
        cache.append(entry(7, 4), 7);
        assert_eq!(cache.start_index(), 7);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_delete_head() {
        let mut cache = filled(1, 10, 10, 4);

        assert_eq!(cache.delete_head(1), 0);
        assert_eq!(cache.delete_head(4), 3);
        assert_eq!(cache.start_index(), 4);
        assert_eq!(cache.len(), 7);
        assert_eq!(cache.bytes_cached(), 70);
        assert_accounting(&cache);

        // Past the end evicts everything but keeps the window position.
        assert_eq!(cache.delete_head(100), 7);
        assert!(cache.is_empty());
        assert_eq!(cache.bytes_cached(), 0);
        assert_eq!(cache.next_index(), 11);
        cache.append(entry(11, 10), 11);
        assert_eq!(cache.get(11).unwrap().index, 11);
    }

    #[test]
    fn test_delete_tail() {
        let mut cache = filled(1, 10, 10, 16);

        assert_eq!(cache.delete_tail(11), 0);
        assert_eq!(cache.delete_tail(8), 3);
        assert_eq!(cache.next_index(), 8);
        assert!(cache.get(8).is_none());
        assert_accounting(&cache);

        // New tail entries take over the truncated indices.
        cache.append(entry(8, 3), 8);
        assert_eq!(cache.get(8).unwrap().data.len(), 3);
        assert_accounting(&cache);

        // A truncation point before the window clears the cache.
        assert_eq!(cache.delete_tail(0), 8);
        assert!(cache.is_empty());
        assert_eq!(cache.start_index(), 1);
    }

    #[test]
    fn test_wraparound_keeps_order() {
        let mut cache = filled(1, 4, 1, 4);
        assert_eq!(cache.capacity(), 4);

        // Free two slots at the front, then wrap.
        cache.delete_head(3);
        cache.append(entry(5, 1), 5);
        cache.append(entry(6, 1), 6);
        assert_eq!(cache.capacity(), 4);

        // Growing a wrapped ring must preserve logical order.
        cache.append(entry(7, 1), 7);
        assert_eq!(cache.capacity(), 8);
        for i in 3..=7 {
            assert_eq!(cache.get(i).unwrap().index, i);
        }
        assert_accounting(&cache);
    }

    #[test]
    fn test_compact_to_budget() {
        let mut cache = filled(1, 10, 100, 4);

        let evicted = cache.compact(450);
        assert_eq!(evicted, 6);
        assert_eq!(cache.bytes_cached(), 400);
        assert_eq!(cache.start_index(), 7);

        // Already within budget.
        assert_eq!(cache.compact(450), 0);
        assert_accounting(&cache);
    }

    #[test]
    fn test_compact_keeps_single_oversized_entry() {
        let mut cache = EntryCache::new(4);
        cache.append(entry(1, 10), 1);
        cache.append(entry(2, 10), 2);
        cache.append(entry(3, 500), 3);

        assert_eq!(cache.compact(100), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(3).unwrap().index, 3);
        assert_eq!(cache.bytes_cached(), 500);
    }

    #[test]
    fn test_compact_never_grows_bytes() {
        let mut cache = EntryCache::new(2);
        for i in 1..=50u64 {
            cache.append(entry(i, (i as usize * 7) % 31), i);
            let before = cache.bytes_cached();
            cache.compact(120);
            assert!(cache.bytes_cached() <= before);
            assert!(cache.bytes_cached() <= 120 || cache.len() == 1);
            assert_accounting(&cache);
        }
    }

    #[test]
    fn test_eviction_releases_shared_reference() {
        let mut cache = EntryCache::new(4);
        let e = entry(1, 4);
        cache.append(e.clone(), 1);
        assert_eq!(Arc::strong_count(&e), 2);

        cache.delete_head(2);
        assert_eq!(Arc::strong_count(&e), 1);

        cache.append(e.clone(), 2);
        cache.delete_tail(2);
        assert_eq!(Arc::strong_count(&e), 1);
    }

    #[test]
    fn test_mixed_operations_accounting() {
        let mut cache = EntryCache::new(3);
        let mut next = 1u64;
        for round in 0..20usize {
            for _ in 0..(round % 5 + 1) {
                cache.append(entry(next, round * 3 + 1), next);
                next += 1;
            }
            match round % 4 {
                0 => {
                    cache.delete_head(cache.start_index() + 2);
                }
                1 => {
                    let n = cache.delete_tail(cache.next_index().saturating_sub(1));
                    next -= n as u64;
                }
                2 => {
                    cache.compact(60);
                }
                _ => {}
            }
            assert_eq!(cache.next_index(), next);
            assert_accounting(&cache);
        }
    }

    #[test]
    fn test_clear_resets_window() {
        let mut cache = filled(10, 20, 5, 4);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.bytes_cached(), 0);

        // A cleared cache accepts a new starting point.
        cache.append(entry(3, 5), 3);
        assert_eq!(cache.start_index(), 3);
    }
}
