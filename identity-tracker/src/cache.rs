//! Shared mapping cache.
//!
//! Mirrors tracker entries keyed by either id. The relational store stays
//! authoritative; an evicted or cold entry only costs a store read.

use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::mapping::IdentityMapping;

/// Default byte budget (200 MiB).
pub const DEFAULT_CACHE_BYTES: usize = 200 * 1024 * 1024;

struct CacheState {
    /// Primary LRU order, keyed by external id.
    by_external: LruCache<String, (IdentityMapping, usize)>,
    /// Reverse index: vector id -> external id.
    by_vector: HashMap<String, String>,
    /// Sum of entry costs currently held.
    bytes: usize,
}

impl CacheState {
    fn remove_external(&mut self, external_id: &str) -> Option<IdentityMapping> {
        let (mapping, cost) = self.by_external.pop(external_id)?;
        self.bytes -= cost;
        if self.by_vector.get(&mapping.vector_id).map(String::as_str) == Some(external_id) {
            self.by_vector.remove(&mapping.vector_id);
        }
        Some(mapping)
    }

    fn remove_vector(&mut self, vector_id: &str) {
        if let Some(external_id) = self.by_vector.remove(vector_id) {
            self.remove_external(&external_id);
        }
    }
}

/// Byte-bounded, LRU-evicting cache of identity mappings.
pub struct SharedCache {
    state: Mutex<CacheState>,
    budget: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub budget: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl SharedCache {
    /// Create a cache holding at most `budget` bytes of entries.
    pub fn new(budget: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                by_external: LruCache::unbounded(),
                by_vector: HashMap::new(),
                bytes: 0,
            }),
            budget,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    // ==========================================
    // Lookups
    // ==========================================

    /// Get a cached mapping by external id.
    pub fn get_by_external(&self, external_id: &str) -> Option<IdentityMapping> {
        let found = self
            .state
            .lock()
            .by_external
            .get(external_id)
            .map(|(m, _)| m.clone());
        self.count(found.is_some());
        found
    }

    /// Get a cached mapping by vector id.
    pub fn get_by_vector(&self, vector_id: &str) -> Option<IdentityMapping> {
        let mut state = self.state.lock();
        let found = match state.by_vector.get(vector_id).cloned() {
            Some(external_id) => state.by_external.get(&external_id).map(|(m, _)| m.clone()),
            None => None,
        };
        drop(state);
        self.count(found.is_some());
        found
    }

    // ==========================================
    // Writes
    // ==========================================

    /// Store a mapping under both ids.
    ///
    /// Returns false when the entry alone exceeds the budget and was not cached.
    pub fn set(&self, mapping: IdentityMapping) -> bool {
        let cost = mapping.approximate_size();
        let mut state = self.state.lock();

        // Drop whatever either key pointed at before.
        state.remove_external(&mapping.external_id);
        state.remove_vector(&mapping.vector_id);

        if cost > self.budget {
            return false;
        }

        state
            .by_vector
            .insert(mapping.vector_id.clone(), mapping.external_id.clone());
        state
            .by_external
            .put(mapping.external_id.clone(), (mapping, cost));
        state.bytes += cost;

        while state.bytes > self.budget {
            match state.by_external.pop_lru() {
                Some((external_id, (evicted, evicted_cost))) => {
                    state.bytes -= evicted_cost;
                    if state.by_vector.get(&evicted.vector_id) == Some(&external_id) {
                        state.by_vector.remove(&evicted.vector_id);
                    }
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }
        true
    }

    // ==========================================
    // Invalidation
    // ==========================================

    /// Drop entries keyed by the external id and, if given, the vector id.
    pub fn invalidate(&self, external_id: &str, vector_id: Option<&str>) {
        let mut state = self.state.lock();
        state.remove_external(external_id);
        if let Some(vector_id) = vector_id {
            state.remove_vector(vector_id);
        }
    }

    /// Invalidate entire cache.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.by_external.clear();
        state.by_vector.clear();
        state.bytes = 0;
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.by_external.len(),
            bytes: state.bytes,
            budget: self.budget,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn count(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Default for SharedCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_BYTES)
    }
}
