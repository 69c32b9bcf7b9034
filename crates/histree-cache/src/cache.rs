//! Bounded cache of decoded nodes keyed by sequence number.

use crate::replacer::{ClockReplacer, Replacer};
use crate::slot::SlotId;
use crate::stats::CacheStats;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use sysinfo::System;

/// Smallest capacity handed out by [`NodeCache::auto_sized`].
const MIN_AUTO_NODES: usize = 64;

struct CacheEntry<V> {
    seq: u32,
    value: Arc<V>,
}

struct CacheInner<V> {
    slots: Vec<Option<CacheEntry<V>>>,
    index: HashMap<u32, SlotId>,
    free_list: Vec<SlotId>,
}

/// Fixed-capacity cache of immutable nodes.
///
/// Values are shared as `Arc<V>`, so a reader keeps its node alive after
/// eviction. Entries are never dirty: the cache only ever holds nodes that
/// are already persisted, so evicting one just drops the decoded copy.
pub struct NodeCache<V> {
    capacity: usize,
    inner: Mutex<CacheInner<V>>,
    replacer: ClockReplacer,
    stats: CacheStats,
}

impl<V> NodeCache<V> {
    /// Creates a cache holding at most `capacity` nodes.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let slots = (0..capacity).map(|_| None).collect();
        // Pop order hands out slot 0 first
        let free_list = (0..capacity).rev().map(|i| SlotId(i as u32)).collect();

        Self {
            capacity,
            inner: Mutex::new(CacheInner {
                slots,
                index: HashMap::with_capacity(capacity),
                free_list,
            }),
            replacer: ClockReplacer::new(capacity),
            stats: CacheStats::new(),
        }
    }

    /// Creates a cache sized to 1/16 of available memory.
    ///
    /// Capacity never drops below 64 nodes so that small machines still
    /// keep the upper levels of a tree resident.
    pub fn auto_sized(block_size: usize) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 16;
        let capacity = (target_bytes / block_size.max(1)).max(MIN_AUTO_NODES);

        Self::new(capacity)
    }

    /// Returns the maximum number of cached nodes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of cached nodes.
    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if the node is cached.
    pub fn contains(&self, seq: u32) -> bool {
        self.inner.lock().index.contains_key(&seq)
    }

    /// Returns the cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Looks up a node, marking it recently used.
    pub fn get(&self, seq: u32) -> Option<Arc<V>> {
        let inner = self.inner.lock();
        match inner.index.get(&seq) {
            Some(&slot) => {
                self.replacer.record_access(slot);
                self.stats.record_hit();
                inner.slots[slot.index()]
                    .as_ref()
                    .map(|entry| Arc::clone(&entry.value))
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Caches a node and returns the shared copy.
    ///
    /// If another thread cached the same node first, its copy wins and is
    /// returned so that all readers share one instance.
    pub fn insert(&self, seq: u32, value: Arc<V>) -> Arc<V> {
        let mut inner = self.inner.lock();

        if let Some(&slot) = inner.index.get(&seq) {
            self.replacer.record_access(slot);
            if let Some(entry) = inner.slots[slot.index()].as_ref() {
                return Arc::clone(&entry.value);
            }
        }

        let slot = match inner.free_list.pop() {
            Some(slot) => slot,
            None => match self.replacer.evict() {
                Some(victim) => {
                    if let Some(old) = inner.slots[victim.index()].take() {
                        inner.index.remove(&old.seq);
                        self.stats.record_eviction();
                        tracing::trace!(seq = old.seq, %victim, "evicted node from cache");
                    }
                    victim
                }
                // A full cache always has an admitted slot; serve uncached.
                None => return value,
            },
        };

        inner.slots[slot.index()] = Some(CacheEntry {
            seq,
            value: Arc::clone(&value),
        });
        inner.index.insert(seq, slot);
        self.replacer.admit(slot);
        self.replacer.record_access(slot);
        self.stats.record_insert();

        value
    }

    /// Drops a node from the cache.
    ///
    /// Returns true if the node was cached.
    pub fn remove(&self, seq: u32) -> bool {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.index.remove(&seq) {
            inner.slots[slot.index()] = None;
            self.replacer.remove(slot);
            inner.free_list.push(slot);
            return true;
        }
        false
    }

    /// Drops every cached node.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let cached: Vec<SlotId> = inner.index.drain().map(|(_, slot)| slot).collect();
        for slot in cached {
            inner.slots[slot.index()] = None;
            self.replacer.remove(slot);
            inner.free_list.push(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_cache_new() {
        let cache: NodeCache<String> = NodeCache::new(4);
        assert_eq!(cache.capacity(), 4);
        assert_eq!(cache.len(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_node_cache_zero_capacity_clamped() {
        let cache: NodeCache<u32> = NodeCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.insert(1, Arc::new(1));
        assert!(cache.contains(1));
    }

    #[test]
    fn test_node_cache_insert_get() {
        let cache = NodeCache::new(4);
        cache.insert(7, Arc::new("seven".to_string()));

        assert_eq!(cache.get(7).as_deref().map(String::as_str), Some("seven"));
        assert!(cache.get(8).is_none());
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[test]
    fn test_node_cache_insert_existing_returns_first_copy() {
        let cache = NodeCache::new(4);
        let first = cache.insert(1, Arc::new(10u64));
        let second = cache.insert(1, Arc::new(20u64));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*second, 10);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_node_cache_evicts_when_full() {
        let cache = NodeCache::new(3);
        for seq in 0..3 {
            cache.insert(seq, Arc::new(seq));
        }
        assert_eq!(cache.len(), 3);

        cache.insert(3, Arc::new(3));
        assert_eq!(cache.len(), 3);
        assert!(cache.contains(3));
        assert_eq!(cache.stats().evictions(), 1);
    }

    #[test]
    fn test_node_cache_prefers_unreferenced_victims() {
        let cache = NodeCache::new(3);
        for seq in 0..3 {
            cache.insert(seq, Arc::new(seq));
        }

        // The first eviction clears every reference bit and takes slot 0.
        cache.insert(3, Arc::new(3));
        assert!(!cache.contains(0));

        // Touch node 1 so node 2 becomes the next victim.
        assert!(cache.get(1).is_some());
        cache.insert(4, Arc::new(4));
        assert!(cache.contains(1));
        assert!(!cache.contains(2));
    }

    #[test]
    fn test_node_cache_evicted_value_survives_for_holder() {
        let cache = NodeCache::new(1);
        let held = cache.insert(1, Arc::new(vec![1u8, 2, 3]));
        cache.insert(2, Arc::new(vec![4u8]));

        assert!(!cache.contains(1));
        assert_eq!(*held, vec![1u8, 2, 3]);
    }

    #[test]
    fn test_node_cache_remove() {
        let cache = NodeCache::new(2);
        cache.insert(1, Arc::new(1));
        cache.insert(2, Arc::new(2));

        assert!(cache.remove(1));
        assert!(!cache.remove(1));
        assert_eq!(cache.len(), 1);

        // The freed slot is reused without eviction
        cache.insert(3, Arc::new(3));
        assert_eq!(cache.stats().evictions(), 0);
        assert!(cache.contains(2));
        assert!(cache.contains(3));
    }

    #[test]
    fn test_node_cache_clear() {
        let cache = NodeCache::new(4);
        for seq in 0..4 {
            cache.insert(seq, Arc::new(seq));
        }
        cache.clear();
        assert!(cache.is_empty());

        for seq in 10..14 {
            cache.insert(seq, Arc::new(seq));
        }
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.stats().evictions(), 0);
    }

    #[test]
    fn test_node_cache_auto_sized() {
        let cache: NodeCache<u8> = NodeCache::auto_sized(64 * 1024);
        assert!(cache.capacity() >= MIN_AUTO_NODES);
    }

    #[test]
    fn test_node_cache_concurrent_access() {
        use std::thread;

        let cache = Arc::new(NodeCache::new(16));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..100u32 {
                        let seq = (t * 100 + i) % 40;
                        let value = cache.insert(seq, Arc::new(seq));
                        assert_eq!(*value, seq);
                        if let Some(v) = cache.get(seq) {
                            assert_eq!(*v, seq);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.len() <= 16);
    }
}
