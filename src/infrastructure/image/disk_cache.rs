//! Disk-based cache of downloaded source files for persistence across sessions.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::file_store::FileByteStore;
use super::metadata_journal::JournalMetadataStore;
use crate::domain::entities::{CacheEntry, Dimensions, TargetBounds};
use crate::domain::ports::{ByteStore, CacheError, CacheResult, MetadataStore};
use crate::domain::services::calculate_sample_size;
use crate::infrastructure::config::storage::default_cache_dir;

/// Maximum disk cache size in bytes (200 MB default).
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 200 * 1024 * 1024;

const JOURNAL_FILE_NAME: &str = "index.jsonl";
const FILES_DIR_NAME: &str = "files";

struct DiskState {
    metadata: Box<dyn MetadataStore>,
    budget: u64,
    clock: u64,
}

impl DiskState {
    /// Next access timestamp: wall-clock milliseconds, strictly increasing.
    fn tick(&mut self) -> u64 {
        let now = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
        self.clock = now.max(self.clock + 1);
        self.clock
    }

    fn on_disk(&self, uri: &str) -> Option<CacheEntry> {
        self.metadata.get(uri).filter(|entry| entry.on_disk)
    }

    /// Evicts the least recently used complete file other than `keep`.
    fn evict_oldest(&mut self, bytes: &dyn ByteStore, keep: Option<&str>) -> Option<CacheEntry> {
        let victim = self
            .metadata
            .oldest_on_disk(2)
            .into_iter()
            .find(|entry| Some(entry.uri.as_str()) != keep)?;
        if let Err(e) = bytes.delete(&victim.uri) {
            warn!(uri = %victim.uri, error = %e, "Failed to delete evicted file");
        }
        match self.metadata.remove(&victim.uri) {
            Ok(_) => {
                debug!(uri = %victim.uri, size = victim.file_size_bytes, "Evicted from disk cache");
                Some(victim)
            }
            Err(e) => {
                warn!(uri = %victim.uri, error = %e, "Failed to remove evicted row");
                None
            }
        }
    }
}

/// Snapshot of disk cache usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskCacheStats {
    /// Rows, provisional ones included.
    pub entries: usize,
    /// Rows whose file is completely written.
    pub on_disk: usize,
    /// Bytes accounted to rows.
    pub bytes: u64,
    /// Byte budget.
    pub budget: u64,
}

impl std::fmt::Display for DiskCacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Disk: {} files ({} pending), {}/{} bytes",
            self.on_disk,
            self.entries - self.on_disk,
            self.bytes,
            self.budget
        )
    }
}

/// LRU cache of source files with durable metadata.
///
/// A write is recorded as a provisional row before the file is written and
/// promoted once it is complete, so a crash mid-write never leaves a row
/// that counts as a hit. Provisional rows are removed when the cache opens.
pub struct DiskImageCache {
    bytes: Arc<dyn ByteStore>,
    state: Mutex<DiskState>,
}

impl DiskImageCache {
    /// Opens a cache over explicit stores, reconciling metadata with the
    /// files that actually exist and trimming to `budget`.
    ///
    /// # Errors
    /// Returns error if stale rows cannot be removed.
    pub fn open(
        bytes: Arc<dyn ByteStore>,
        metadata: Box<dyn MetadataStore>,
        budget: u64,
    ) -> CacheResult<Self> {
        let cache = Self {
            bytes,
            state: Mutex::new(DiskState {
                metadata,
                budget,
                clock: 0,
            }),
        };
        let removed = cache.reconcile()?;
        let evicted = cache.trim_to_budget();
        let stats = cache.stats();
        info!(
            files = stats.on_disk,
            bytes = stats.bytes,
            budget,
            removed,
            evicted,
            "Opened disk cache"
        );
        Ok(cache)
    }

    /// Opens a cache whose files and journal live under `dir`.
    ///
    /// # Errors
    /// Returns error if the directory or journal cannot be opened.
    pub fn open_in(dir: impl Into<PathBuf>, budget: u64) -> CacheResult<Self> {
        let dir = dir.into();
        let bytes = FileByteStore::new(dir.join(FILES_DIR_NAME))?;
        let metadata = JournalMetadataStore::open(dir.join(JOURNAL_FILE_NAME))?;
        Self::open(Arc::new(bytes), Box::new(metadata), budget)
    }

    /// Creates a cache in the default location (~/.cache/pixcache/images/).
    ///
    /// # Errors
    /// Returns error if cache directory cannot be created.
    pub fn default_location(budget: u64) -> CacheResult<Self> {
        Self::open_in(default_cache_dir(), budget)
    }

    fn reconcile(&self) -> CacheResult<usize> {
        let mut state = self.state.lock();
        let mut removed = 0;
        for entry in state.metadata.entries() {
            if !entry.on_disk {
                if let Err(e) = self.bytes.delete(&entry.uri) {
                    warn!(uri = %entry.uri, error = %e, "Failed to delete partial file");
                }
                state.metadata.remove(&entry.uri)?;
                removed += 1;
                debug!(uri = %entry.uri, "Dropped interrupted write");
            } else if !self.bytes.exists(&entry.uri) {
                state.metadata.remove(&entry.uri)?;
                removed += 1;
                debug!(uri = %entry.uri, "Dropped row without file");
            } else {
                state.clock = state.clock.max(entry.last_access_time);
            }
        }
        Ok(removed)
    }

    /// Returns true if a complete file for `uri` is cached.
    #[must_use]
    pub fn is_cached(&self, uri: &str) -> bool {
        self.state.lock().on_disk(uri).is_some()
    }

    /// Returns the recorded dimensions of a cached file.
    #[must_use]
    pub fn dimensions(&self, uri: &str) -> Option<Dimensions> {
        self.state
            .lock()
            .on_disk(uri)
            .and_then(|entry| entry.dimensions())
    }

    /// Sample size for decoding the cached file into `bounds`, or `None`
    /// while its dimensions are unknown.
    #[must_use]
    pub fn sample_size_for(&self, uri: &str, bounds: TargetBounds) -> Option<u32> {
        self.dimensions(uri)
            .map(|dimensions| calculate_sample_size(dimensions, bounds))
    }

    /// Records probed dimensions. Returns false if `uri` has no row.
    ///
    /// # Errors
    /// Returns error if the row cannot be persisted.
    pub fn set_dimensions(&self, uri: &str, dimensions: Dimensions) -> CacheResult<bool> {
        let mut state = self.state.lock();
        let Some(mut entry) = state.metadata.get(uri) else {
            return Ok(false);
        };
        if entry.dimensions() != Some(dimensions) {
            entry.set_dimensions(dimensions);
            state.metadata.upsert(entry)?;
        }
        Ok(true)
    }

    /// Records that a write of `uri` is starting.
    ///
    /// # Errors
    /// Returns error if the provisional row cannot be persisted.
    pub fn begin_write(&self, uri: &str) -> CacheResult<()> {
        let mut state = self.state.lock();
        let now = state.tick();
        state.metadata.upsert(CacheEntry::provisional(uri, now))?;
        trace!(uri, "Began disk write");
        Ok(())
    }

    /// Promotes the row of a finished write, then trims to the budget. The
    /// file just written is never the one evicted, so a file larger than the
    /// whole budget stays until the next write replaces it.
    ///
    /// # Errors
    /// Returns error if the row cannot be persisted.
    pub fn end_write(&self, uri: &str, size: u64, dimensions: Option<Dimensions>) -> CacheResult<()> {
        {
            let mut state = self.state.lock();
            let last_access_time = state.tick();
            state.metadata.upsert(CacheEntry {
                uri: uri.to_string(),
                file_size_bytes: size,
                width: dimensions.map(|d| d.width),
                height: dimensions.map(|d| d.height),
                last_access_time,
                on_disk: true,
            })?;
        }
        debug!(uri, size, "Stored file in disk cache");
        self.trim(Some(uri));
        Ok(())
    }

    /// Discards a failed write: the partial file and its row.
    pub fn write_failed(&self, uri: &str) {
        let mut state = self.state.lock();
        if let Err(e) = self.bytes.delete(uri) {
            warn!(uri, error = %e, "Failed to delete partial file");
        }
        if let Err(e) = state.metadata.remove(uri) {
            warn!(uri, error = %e, "Failed to remove provisional row");
        }
        debug!(uri, "Disk write failed");
    }

    /// Runs the whole write protocol for `source`. Returns the bytes written.
    ///
    /// # Errors
    /// Returns error if any step fails; the write is then discarded.
    pub fn store(&self, uri: &str, source: &mut dyn Read) -> CacheResult<u64> {
        self.begin_write(uri)?;
        let size = match self.bytes.write(uri, source) {
            Ok(size) => size,
            Err(e) => {
                self.write_failed(uri);
                return Err(e);
            }
        };
        if let Err(e) = self.end_write(uri, size, None) {
            self.write_failed(uri);
            return Err(e);
        }
        Ok(size)
    }

    /// Reads a cached file and marks it most recently used.
    ///
    /// # Errors
    /// Returns `CacheError::NotFound` if the file is not cached; a row whose
    /// file vanished is dropped.
    pub fn read(&self, uri: &str) -> CacheResult<Bytes> {
        if !self.is_cached(uri) {
            trace!(uri, "Disk cache miss");
            return Err(CacheError::NotFound(uri.to_string()));
        }
        match self.bytes.read(uri) {
            Ok(bytes) => {
                trace!(uri, size = bytes.len(), "Disk cache hit");
                self.bump(uri);
                Ok(bytes)
            }
            Err(CacheError::NotFound(_)) => {
                warn!(uri, "Cached file vanished");
                if let Err(e) = self.state.lock().metadata.remove(uri) {
                    warn!(uri, error = %e, "Failed to remove stale row");
                }
                Err(CacheError::NotFound(uri.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Marks a cached file most recently used.
    pub fn bump(&self, uri: &str) -> bool {
        let mut state = self.state.lock();
        let Some(mut entry) = state.on_disk(uri) else {
            return false;
        };
        entry.last_access_time = state.tick();
        if let Err(e) = state.metadata.upsert(entry) {
            warn!(uri, error = %e, "Failed to record access");
        }
        true
    }

    /// Removes a file and its row. Returns true if a row existed.
    pub fn remove(&self, uri: &str) -> bool {
        let mut state = self.state.lock();
        let existed = state.metadata.get(uri).is_some();
        if let Err(e) = self.bytes.delete(uri) {
            warn!(uri, error = %e, "Failed to evict from disk cache");
        }
        if let Err(e) = state.metadata.remove(uri) {
            warn!(uri, error = %e, "Failed to remove row");
        }
        if existed {
            debug!(uri, "Evicted from disk cache");
        }
        existed
    }

    /// Evicts the least recently used complete file.
    pub fn evict_lru(&self) -> Option<CacheEntry> {
        self.state.lock().evict_oldest(self.bytes.as_ref(), None)
    }

    /// Evicts least recently used files until within budget. Returns how
    /// many were evicted.
    pub fn trim_to_budget(&self) -> usize {
        self.trim(None)
    }

    fn trim(&self, keep: Option<&str>) -> usize {
        let mut state = self.state.lock();
        let current_size = state.metadata.total_size();
        if current_size <= state.budget {
            return 0;
        }
        debug!(current_size, max_size = state.budget, "Disk cache over limit, cleaning up");

        let mut evicted = 0;
        while state.metadata.total_size() > state.budget {
            if state.evict_oldest(self.bytes.as_ref(), keep).is_none() {
                break;
            }
            evicted += 1;
        }
        debug!(
            freed_count = evicted,
            remaining = state.metadata.total_size(),
            "Disk cache cleanup complete"
        );
        evicted
    }

    /// Changes the budget and trims. Returns how many files were evicted.
    pub fn set_budget(&self, budget: u64) -> usize {
        self.state.lock().budget = budget;
        self.trim_to_budget()
    }

    /// Returns the budget in bytes.
    #[must_use]
    pub fn budget(&self) -> u64 {
        self.state.lock().budget
    }

    /// Returns the bytes accounted to rows.
    #[must_use]
    pub fn current_size(&self) -> u64 {
        self.state.lock().metadata.total_size()
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().metadata.len()
    }

    /// Returns true if there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears the entire disk cache.
    ///
    /// # Errors
    /// Returns error if the metadata cannot be cleared.
    pub fn clear(&self) -> CacheResult<()> {
        let mut state = self.state.lock();
        for entry in state.metadata.entries() {
            if let Err(e) = self.bytes.delete(&entry.uri) {
                warn!(uri = %entry.uri, error = %e, "Failed to remove cache file");
            }
        }
        state.metadata.clear()?;
        debug!("Cleared disk cache");
        Ok(())
    }

    /// Returns usage statistics.
    #[must_use]
    pub fn stats(&self) -> DiskCacheStats {
        let state = self.state.lock();
        let entries = state.metadata.entries();
        DiskCacheStats {
            entries: entries.len(),
            on_disk: entries.iter().filter(|entry| entry.on_disk).count(),
            bytes: state.metadata.total_size(),
            budget: state.budget,
        }
    }
}
