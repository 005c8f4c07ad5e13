//! Bounded, non-authoritative identifier cache

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use uuid::Uuid;

/// Each insertion is stamped with a sequence number so that a queue slot
/// left behind by an evicted key never matches a later re-insertion.
#[derive(Default)]
struct Entries {
    map: HashMap<i64, (Uuid, u64)>,
    /// Insertion order, oldest first. May hold stale slots.
    order: VecDeque<(i64, u64)>,
    next_seq: u64,
}

impl Entries {
    fn is_live(&self, source_id: i64, seq: u64) -> bool {
        matches!(self.map.get(&source_id), Some((_, s)) if *s == seq)
    }
}

/// Source id -> target id cache for one entity type.
///
/// Evicts the oldest insertion once `max_size` is reached. A poisoned lock
/// degrades to a miss; the mapping store stays the source of truth.
pub struct IdCache {
    entries: RwLock<Entries>,
    max_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Cache counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl IdCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            max_size: max_size.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, source_id: i64) -> Option<Uuid> {
        let found = self
            .entries
            .read()
            .ok()
            .and_then(|e| e.map.get(&source_id).map(|(id, _)| *id));

        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn insert(&self, source_id: i64, target_id: Uuid) {
        let Ok(mut entries) = self.entries.write() else {
            return;
        };
        if entries.map.contains_key(&source_id) {
            return;
        }

        while entries.map.len() >= self.max_size {
            match entries.order.pop_front() {
                Some((oldest, seq)) => {
                    if entries.is_live(oldest, seq) {
                        entries.map.remove(&oldest);
                    }
                }
                None => break,
            }
        }

        let seq = entries.next_seq;
        entries.next_seq += 1;
        entries.map.insert(source_id, (target_id, seq));
        entries.order.push_back((source_id, seq));

        // Stale slots from explicit evictions accumulate in `order`
        if entries.order.len() > self.max_size.saturating_mul(2) {
            let Entries { map, order, .. } = &mut *entries;
            order.retain(|(k, seq)| matches!(map.get(k), Some((_, s)) if s == seq));
        }
    }

    /// Drop one entry; returns whether it was cached
    pub fn evict(&self, source_id: i64) -> bool {
        self.entries
            .write()
            .map(|mut e| e.map.remove(&source_id).is_some())
            .unwrap_or(false)
    }

    fn len(&self) -> usize {
        self.entries.read().map(|e| e.map.len()).unwrap_or(0)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for IdCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdCache")
            .field("max_size", &self.max_size)
            .field("current_size", &self.len())
            .finish()
    }
}
