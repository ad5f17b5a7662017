//! Response store implementations.
//!
//! Two interchangeable strategies behind one trait: least-recently-used
//! (backed by `lru::LruCache` with byte accounting) and least-frequently-used
//! (a map paired with a `(frequency, insertion)`-ordered set). Both enforce a
//! byte budget, treat entries past their TTL as misses, and keep counters for
//! `stats()`.
//!
//! Lookup promotion is a logical write, so `get` runs under the write lock;
//! the critical section touches a single entry and never spans an eviction
//! sweep.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::{debug, warn};

use crate::config::{CacheSettings, CacheStrategy};

use super::entry::{AssetEntry, AssetKey, CacheStats};

const SOURCE: &str = "cache::store";

// A request thread panicking inside a store operation must not take every
// later request down with a poisoned lock; the guard is recovered and the
// store keeps serving whatever state the panicked operation left behind.
fn write_or_recover<'a, T>(
    lock: &'a RwLock<T>,
    strategy: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|poisoned| {
        warn!(
            strategy,
            op, "store lock poisoned by a panicked request; serving recovered entries"
        );
        poisoned.into_inner()
    })
}

fn read_or_recover<'a, T>(
    lock: &'a RwLock<T>,
    strategy: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|poisoned| {
        warn!(
            strategy,
            op, "store lock poisoned by a panicked request; serving recovered entries"
        );
        poisoned.into_inner()
    })
}

/// Shared response store interface.
///
/// An entry larger than the whole budget is silently rejected: `set` returns
/// without error and the next `get` misses. Eviction only ever removes other
/// entries, never the one being inserted.
pub trait AssetCache: Send + Sync {
    fn get(&self, key: &AssetKey) -> Option<AssetEntry>;
    fn set(&self, key: AssetKey, entry: AssetEntry);
    fn delete(&self, key: &AssetKey);
    fn clear(&self);
    fn stats(&self) -> CacheStats;
    /// Drop every entry whose age exceeds the TTL. Driven by the sweeper.
    fn remove_expired(&self);
}

/// Build the store selected by configuration.
pub fn new_store(settings: &CacheSettings) -> Arc<dyn AssetCache> {
    match settings.strategy {
        CacheStrategy::Lru => Arc::new(LruAssetStore::new(settings.size_bytes, settings.ttl)),
        CacheStrategy::Lfu => Arc::new(LfuAssetStore::new(settings.size_bytes, settings.ttl)),
    }
}

// ============================================================================
// LRU store
// ============================================================================

struct LruInner {
    entries: LruCache<AssetKey, AssetEntry>,
    current_size: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

pub struct LruAssetStore {
    inner: RwLock<LruInner>,
    max_size: u64,
    ttl: Duration,
}

impl LruAssetStore {
    pub fn new(max_size: u64, ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(LruInner {
                entries: LruCache::unbounded(),
                current_size: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            max_size,
            ttl,
        }
    }
}

impl AssetCache for LruAssetStore {
    fn get(&self, key: &AssetKey) -> Option<AssetEntry> {
        let mut guard = write_or_recover(&self.inner, "lru", "get");
        let inner = &mut *guard;

        let stale = inner
            .entries
            .peek(key)
            .is_some_and(|entry| entry.created_at.elapsed() > self.ttl);
        if stale {
            if let Some(old) = inner.entries.pop(key) {
                inner.current_size -= old.size();
            }
            inner.misses += 1;
            return None;
        }

        match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.access_count += 1;
                let found = entry.clone();
                inner.hits += 1;
                Some(found)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    fn set(&self, key: AssetKey, mut entry: AssetEntry) {
        let size = entry.size();
        if size > self.max_size {
            debug!(
                target_module = SOURCE,
                path = %key.path,
                size,
                budget = self.max_size,
                "entry exceeds cache budget; not stored"
            );
            return;
        }

        let mut guard = write_or_recover(&self.inner, "lru", "set");
        let inner = &mut *guard;

        if let Some(old) = inner.entries.pop(&key) {
            inner.current_size -= old.size();
        }

        while inner.current_size + size > self.max_size {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => {
                    inner.current_size -= evicted.size();
                    inner.evictions += 1;
                }
                None => break,
            }
        }

        entry.created_at = Instant::now();
        inner.current_size += size;
        inner.entries.push(key, entry);
    }

    fn delete(&self, key: &AssetKey) {
        let mut guard = write_or_recover(&self.inner, "lru", "delete");
        let inner = &mut *guard;
        if let Some(entry) = inner.entries.pop(key) {
            inner.current_size -= entry.size();
        }
    }

    fn clear(&self) {
        let mut guard = write_or_recover(&self.inner, "lru", "clear");
        let inner = &mut *guard;
        inner.entries.clear();
        inner.current_size = 0;
        inner.hits = 0;
        inner.misses = 0;
        inner.evictions = 0;
    }

    fn stats(&self) -> CacheStats {
        let inner = read_or_recover(&self.inner, "lru", "stats");
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            size: inner.current_size,
            item_count: inner.entries.len(),
        }
    }

    fn remove_expired(&self) {
        let mut guard = write_or_recover(&self.inner, "lru", "remove_expired");
        let inner = &mut *guard;

        let expired: Vec<AssetKey> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.created_at.elapsed() > self.ttl)
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            if let Some(entry) = inner.entries.pop(&key) {
                inner.current_size -= entry.size();
            }
        }
    }
}

// ============================================================================
// LFU store
// ============================================================================

struct LfuSlot {
    entry: AssetEntry,
    freq: u64,
    seq: u64,
}

struct LfuInner {
    slots: HashMap<AssetKey, LfuSlot>,
    /// Eviction order: minimum frequency first, earliest insertion breaking
    /// ties.
    order: BTreeSet<(u64, u64, AssetKey)>,
    current_size: u64,
    next_seq: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

pub struct LfuAssetStore {
    inner: RwLock<LfuInner>,
    max_size: u64,
    ttl: Duration,
}

impl LfuAssetStore {
    pub fn new(max_size: u64, ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(LfuInner {
                slots: HashMap::new(),
                order: BTreeSet::new(),
                current_size: 0,
                next_seq: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            max_size,
            ttl,
        }
    }
}

impl LfuInner {
    fn remove_slot(&mut self, key: &AssetKey) {
        if let Some(slot) = self.slots.remove(key) {
            self.order.remove(&(slot.freq, slot.seq, key.clone()));
            self.current_size -= slot.entry.size();
        }
    }

    fn evict_least_frequent(&mut self) -> bool {
        match self.order.pop_first() {
            Some((_, _, victim)) => {
                if let Some(slot) = self.slots.remove(&victim) {
                    self.current_size -= slot.entry.size();
                }
                self.evictions += 1;
                true
            }
            None => false,
        }
    }
}

impl AssetCache for LfuAssetStore {
    fn get(&self, key: &AssetKey) -> Option<AssetEntry> {
        let mut guard = write_or_recover(&self.inner, "lfu", "get");
        let inner = &mut *guard;

        let stale = inner
            .slots
            .get(key)
            .is_some_and(|slot| slot.entry.created_at.elapsed() > self.ttl);
        if stale {
            inner.remove_slot(key);
            inner.misses += 1;
            return None;
        }

        let Some(slot) = inner.slots.get_mut(key) else {
            inner.misses += 1;
            return None;
        };

        let previous = (slot.freq, slot.seq);
        slot.freq += 1;
        slot.entry.access_count += 1;
        let promoted = (slot.freq, slot.seq);
        let found = slot.entry.clone();

        inner.order.remove(&(previous.0, previous.1, key.clone()));
        inner.order.insert((promoted.0, promoted.1, key.clone()));
        inner.hits += 1;
        Some(found)
    }

    fn set(&self, key: AssetKey, mut entry: AssetEntry) {
        let size = entry.size();
        if size > self.max_size {
            debug!(
                target_module = SOURCE,
                path = %key.path,
                size,
                budget = self.max_size,
                "entry exceeds cache budget; not stored"
            );
            return;
        }

        let mut guard = write_or_recover(&self.inner, "lfu", "set");
        let inner = &mut *guard;
        entry.created_at = Instant::now();

        // Re-insertion keeps the accumulated frequency.
        if let Some(slot) = inner.slots.get_mut(&key) {
            let old_size = slot.entry.size();
            let previous = (slot.freq, slot.seq);
            slot.entry = entry;
            slot.freq += 1;
            let promoted = (slot.freq, slot.seq);

            inner.current_size -= old_size;
            inner.current_size += size;
            inner.order.remove(&(previous.0, previous.1, key.clone()));
            inner.order.insert((promoted.0, promoted.1, key));
            return;
        }

        while inner.current_size + size > self.max_size {
            if !inner.evict_least_frequent() {
                break;
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert((1, seq, key.clone()));
        inner.slots.insert(key, LfuSlot { entry, freq: 1, seq });
        inner.current_size += size;
    }

    fn delete(&self, key: &AssetKey) {
        let mut guard = write_or_recover(&self.inner, "lfu", "delete");
        guard.remove_slot(key);
    }

    fn clear(&self) {
        let mut guard = write_or_recover(&self.inner, "lfu", "clear");
        let inner = &mut *guard;
        inner.slots.clear();
        inner.order.clear();
        inner.current_size = 0;
        inner.hits = 0;
        inner.misses = 0;
        inner.evictions = 0;
    }

    fn stats(&self) -> CacheStats {
        let inner = read_or_recover(&self.inner, "lfu", "stats");
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            size: inner.current_size,
            item_count: inner.slots.len(),
        }
    }

    fn remove_expired(&self) {
        let mut guard = write_or_recover(&self.inner, "lfu", "remove_expired");
        let inner = &mut *guard;

        let expired: Vec<AssetKey> = inner
            .slots
            .iter()
            .filter(|(_, slot)| slot.entry.created_at.elapsed() > self.ttl)
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            inner.remove_slot(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use bytes::Bytes;

    use crate::compress::Encoding;

    use super::*;

    fn entry(body: &str) -> AssetEntry {
        AssetEntry {
            bytes: Bytes::copy_from_slice(body.as_bytes()),
            content_type: "text/plain".to_string(),
            encoding: Encoding::Identity,
            etag: format!("\"{body}\""),
            last_modified: SystemTime::UNIX_EPOCH,
            created_at: Instant::now(),
            access_count: 0,
        }
    }

    fn key(path: &str) -> AssetKey {
        AssetKey::new(path, Encoding::Identity, false)
    }

    fn stores() -> Vec<Arc<dyn AssetCache>> {
        vec![
            Arc::new(LruAssetStore::new(1024, Duration::from_secs(60))),
            Arc::new(LfuAssetStore::new(1024, Duration::from_secs(60))),
        ]
    }

    #[test]
    fn roundtrip_and_stats() {
        for store in stores() {
            assert!(store.get(&key("/a")).is_none());
            store.set(key("/a"), entry("hello"));

            let found = store.get(&key("/a")).expect("cached entry");
            assert_eq!(found.bytes, Bytes::from("hello"));

            let stats = store.stats();
            assert_eq!(stats.hits, 1);
            assert_eq!(stats.misses, 1);
            assert_eq!(stats.size, 5);
            assert_eq!(stats.item_count, 1);
        }
    }

    #[test]
    fn distinct_encodings_and_flavors_do_not_collide() {
        for store in stores() {
            store.set(AssetKey::new("/a", Encoding::Identity, false), entry("plain"));
            store.set(AssetKey::new("/a", Encoding::Gzip, false), entry("gzipd"));
            store.set(AssetKey::new("/a", Encoding::Identity, true), entry("vflav"));

            assert_eq!(
                store
                    .get(&AssetKey::new("/a", Encoding::Gzip, false))
                    .unwrap()
                    .bytes,
                Bytes::from("gzipd")
            );
            assert_eq!(
                store
                    .get(&AssetKey::new("/a", Encoding::Identity, true))
                    .unwrap()
                    .bytes,
                Bytes::from("vflav")
            );
            assert_eq!(store.stats().item_count, 3);
        }
    }

    #[test]
    fn replacing_a_key_subtracts_the_old_size() {
        for store in stores() {
            store.set(key("/a"), entry("aaaaaaaaaa"));
            store.set(key("/a"), entry("bb"));

            let stats = store.stats();
            assert_eq!(stats.size, 2);
            assert_eq!(stats.item_count, 1);
        }
    }

    #[test]
    fn oversized_entry_is_silently_rejected() {
        let store = LruAssetStore::new(4, Duration::from_secs(60));
        store.set(key("/big"), entry("too large for the budget"));
        assert!(store.get(&key("/big")).is_none());
        assert_eq!(store.stats().size, 0);

        let store = LfuAssetStore::new(4, Duration::from_secs(60));
        store.set(key("/big"), entry("too large for the budget"));
        assert!(store.get(&key("/big")).is_none());
        assert_eq!(store.stats().size, 0);
    }

    #[test]
    fn budget_is_respected_after_every_set() {
        for store in [
            Arc::new(LruAssetStore::new(10, Duration::from_secs(60))) as Arc<dyn AssetCache>,
            Arc::new(LfuAssetStore::new(10, Duration::from_secs(60))),
        ] {
            store.set(key("/a"), entry("aaaa"));
            store.set(key("/b"), entry("bbbb"));
            store.set(key("/c"), entry("cccc"));

            let stats = store.stats();
            assert!(stats.size <= 10, "size {} exceeds budget", stats.size);
            assert!(stats.evictions >= 1);
        }
    }

    #[test]
    fn lru_evicts_least_recently_used_first() {
        let store = LruAssetStore::new(12, Duration::from_secs(60));
        store.set(key("/a"), entry("aaaa"));
        store.set(key("/b"), entry("bbbb"));
        store.set(key("/c"), entry("cccc"));

        // Touch /a so /b becomes the eviction candidate.
        assert!(store.get(&key("/a")).is_some());

        store.set(key("/d"), entry("dddd"));
        assert!(store.get(&key("/b")).is_none());
        assert!(store.get(&key("/a")).is_some());
        assert!(store.get(&key("/c")).is_some());
        assert!(store.get(&key("/d")).is_some());
    }

    #[test]
    fn lfu_evicts_minimum_frequency_first() {
        let store = LfuAssetStore::new(12, Duration::from_secs(60));
        store.set(key("/a"), entry("aaaa"));
        store.set(key("/b"), entry("bbbb"));
        store.set(key("/c"), entry("cccc"));

        // /a and /c gain frequency; /b stays at 1 and is evicted.
        assert!(store.get(&key("/a")).is_some());
        assert!(store.get(&key("/c")).is_some());

        store.set(key("/d"), entry("dddd"));
        assert!(store.get(&key("/b")).is_none());
        assert!(store.get(&key("/a")).is_some());
    }

    #[test]
    fn lfu_ties_break_by_earliest_insertion() {
        let store = LfuAssetStore::new(12, Duration::from_secs(60));
        store.set(key("/first"), entry("aaaa"));
        store.set(key("/later"), entry("bbbb"));
        store.set(key("/third"), entry("cccc"));

        // All at frequency 1; /first is oldest and goes.
        store.set(key("/fresh"), entry("dddd"));
        assert!(store.get(&key("/first")).is_none());
        assert!(store.get(&key("/later")).is_some());
    }

    #[test]
    fn lfu_frequency_survives_reinsertion() {
        let store = LfuAssetStore::new(12, Duration::from_secs(60));
        store.set(key("/a"), entry("aaaa"));
        assert!(store.get(&key("/a")).is_some());
        assert!(store.get(&key("/a")).is_some());

        // Re-insert /a; its accumulated frequency keeps it above fresh keys.
        store.set(key("/a"), entry("AAAA"));
        store.set(key("/b"), entry("bbbb"));
        store.set(key("/c"), entry("cccc"));
        store.set(key("/d"), entry("dddd"));

        assert!(store.get(&key("/a")).is_some());
    }

    #[test]
    fn expired_entries_read_as_misses() {
        for store in [
            Arc::new(LruAssetStore::new(1024, Duration::from_millis(10))) as Arc<dyn AssetCache>,
            Arc::new(LfuAssetStore::new(1024, Duration::from_millis(10))),
        ] {
            store.set(key("/a"), entry("hello"));
            std::thread::sleep(Duration::from_millis(30));

            assert!(store.get(&key("/a")).is_none());
            let stats = store.stats();
            assert_eq!(stats.item_count, 0);
            assert_eq!(stats.size, 0);
        }
    }

    #[test]
    fn remove_expired_sweeps_stale_entries() {
        for store in [
            Arc::new(LruAssetStore::new(1024, Duration::from_millis(10))) as Arc<dyn AssetCache>,
            Arc::new(LfuAssetStore::new(1024, Duration::from_millis(10))),
        ] {
            store.set(key("/a"), entry("hello"));
            store.set(key("/b"), entry("world"));
            std::thread::sleep(Duration::from_millis(30));

            store.remove_expired();
            let stats = store.stats();
            assert_eq!(stats.item_count, 0);
            assert_eq!(stats.size, 0);
        }
    }

    #[test]
    fn delete_and_clear() {
        for store in stores() {
            store.set(key("/a"), entry("hello"));
            store.set(key("/b"), entry("world"));

            store.delete(&key("/a"));
            assert!(store.get(&key("/a")).is_none());
            assert_eq!(store.stats().item_count, 1);

            store.clear();
            let stats = store.stats();
            assert_eq!(stats.item_count, 0);
            assert_eq!(stats.size, 0);
            assert_eq!(stats.hits, 0);
        }
    }

    #[test]
    fn strategy_selection_builds_the_right_store() {
        let lru = new_store(&CacheSettings {
            strategy: CacheStrategy::Lru,
            ..Default::default()
        });
        let lfu = new_store(&CacheSettings {
            strategy: CacheStrategy::Lfu,
            ..Default::default()
        });
        lru.set(key("/a"), entry("x"));
        lfu.set(key("/a"), entry("x"));
        assert_eq!(lru.stats().item_count, 1);
        assert_eq!(lfu.stats().item_count, 1);
    }
}
