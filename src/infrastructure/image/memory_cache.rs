//! In-memory LRU cache of decoded images, bounded by bytes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{DecodeSignature, DecodedImage};

/// Default byte budget of the memory cache.
pub const DEFAULT_MEMORY_BUDGET: usize = 64 * 1024 * 1024;

struct Resident {
    image: Arc<DecodedImage>,
    cost: usize,
}

struct MemoryState {
    entries: LruCache<DecodeSignature, Resident>,
    resident_bytes: usize,
    budget: usize,
}

impl MemoryState {
    /// Evicts least recently used entries until within budget. The most
    /// recent entry always stays, even when it alone exceeds the budget.
    fn trim(&mut self) -> usize {
        let mut evicted = 0;
        while self.resident_bytes > self.budget && self.entries.len() > 1 {
            let Some((signature, resident)) = self.entries.pop_lru() else {
                break;
            };
            self.resident_bytes -= resident.cost;
            evicted += 1;
            trace!(signature = %signature, bytes = resident.cost, "Evicted from memory cache");
        }
        evicted
    }
}

/// Decoded payloads keyed by decode signature.
///
/// Resident bytes never exceed the budget, except for a single entry that is
/// larger than the whole budget, which is then the only resident entry.
pub struct MemoryImageCache {
    state: Mutex<MemoryState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a cache holding at most `budget` bytes.
    #[must_use]
    pub fn new(budget: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                entries: LruCache::unbounded(),
                resident_bytes: 0,
                budget,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a cache with [`DEFAULT_MEMORY_BUDGET`].
    #[must_use]
    pub fn with_default_budget() -> Self {
        Self::new(DEFAULT_MEMORY_BUDGET)
    }

    /// Returns a payload and marks it most recently used.
    pub fn get(&self, signature: &DecodeSignature) -> Option<Arc<DecodedImage>> {
        let mut state = self.state.lock();
        if let Some(resident) = state.entries.get(signature) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(signature = %signature, "Memory cache hit");
            Some(Arc::clone(&resident.image))
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(signature = %signature, "Memory cache miss");
            None
        }
    }

    /// Peeks at a payload without promoting it in the LRU.
    pub fn peek(&self, signature: &DecodeSignature) -> Option<Arc<DecodedImage>> {
        let state = self.state.lock();
        state
            .entries
            .peek(signature)
            .map(|resident| Arc::clone(&resident.image))
    }

    /// Returns true if a payload for `signature` is resident.
    #[must_use]
    pub fn contains(&self, signature: &DecodeSignature) -> bool {
        self.state.lock().entries.contains(signature)
    }

    /// Stores a payload as most recently used, replacing any previous one,
    /// then evicts down to the budget.
    pub fn put(&self, signature: DecodeSignature, image: Arc<DecodedImage>) {
        let cost = image.byte_cost();
        let mut state = self.state.lock();
        debug!(signature = %signature, bytes = cost, "Storing image in memory cache");
        if let Some(previous) = state.entries.put(signature, Resident { image, cost }) {
            state.resident_bytes -= previous.cost;
        }
        state.resident_bytes += cost;
        state.trim();
    }

    /// Removes one payload.
    pub fn remove(&self, signature: &DecodeSignature) -> bool {
        let mut state = self.state.lock();
        match state.entries.pop(signature) {
            Some(resident) => {
                state.resident_bytes -= resident.cost;
                debug!(signature = %signature, "Evicted image from memory cache");
                true
            }
            None => false,
        }
    }

    /// Removes every variant of `uri`. Returns how many were removed.
    pub fn remove_all_for_uri(&self, uri: &str) -> usize {
        let mut state = self.state.lock();
        let doomed: Vec<DecodeSignature> = state
            .entries
            .iter()
            .filter(|(signature, _)| signature.uri == uri)
            .map(|(signature, _)| signature.clone())
            .collect();
        for signature in &doomed {
            if let Some(resident) = state.entries.pop(signature) {
                state.resident_bytes -= resident.cost;
            }
        }
        doomed.len()
    }

    /// Changes the budget, evicting if it shrank. Returns how many entries
    /// were evicted.
    pub fn set_budget(&self, budget: usize) -> usize {
        let mut state = self.state.lock();
        state.budget = budget;
        let evicted = state.trim();
        debug!(budget, evicted, "Memory cache budget changed");
        evicted
    }

    /// Returns the budget in bytes.
    #[must_use]
    pub fn budget(&self) -> usize {
        self.state.lock().budget
    }

    /// Returns the bytes currently resident.
    #[must_use]
    pub fn resident_bytes(&self) -> usize {
        self.state.lock().resident_bytes
    }

    /// Returns the number of resident payloads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if nothing is resident.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every payload.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.resident_bytes = 0;
        debug!("Cleared memory image cache");
    }

    /// Returns true if the running byte total matches the resident entries.
    #[must_use]
    pub fn verify_accounting(&self) -> bool {
        let state = self.state.lock();
        let actual: usize = state.entries.iter().map(|(_, resident)| resident.cost).sum();
        actual == state.resident_bytes
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let state = self.state.lock();
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: state.entries.len(),
            resident_bytes: state.resident_bytes,
            budget: state.budget,
        }
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::with_default_budget()
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
    /// Bytes currently resident.
    pub resident_bytes: usize,
    /// Byte budget.
    pub budget: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Memory: {} images, {}/{} bytes, {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.resident_bytes, self.budget, self.hit_rate, self.hits, self.misses
        )
    }
}
