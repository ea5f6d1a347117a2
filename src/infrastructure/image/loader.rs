//! Image loading orchestrator.
//!
//! Implements a three-tier cache: Memory -> Disk -> Network. A request that
//! misses memory moves through up to three single-flight phases: download
//! into the disk cache, dimension probe, then decode into the memory cache.
//! Downloads run on the network pool; probes and decodes on the decode pool.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::application::dto::{ImageLoadedEvent, Intent, ListenerParams, RequestOutcome};
use crate::application::operations::{OperationCoordinator, OperationKey, PendingCounts};
use crate::application::scheduling::{
    Completion, PoolStats, Prioritizable, PriorityClass, TaskId, WorkerPool, no_completion,
};
use crate::domain::entities::{
    CacheKey, ConsumerId, DecodeSignature, Dimensions, ImageSource, LoadedImage, PixelFormat,
    RequestHandle, ResourceRequest, TargetBounds,
};
use crate::domain::errors::{LoadError, LoadResult};
use crate::domain::ports::{CacheError, CacheResult, ImageDecoderPort, Transport};

use super::decoder::ImageCrateDecoder;
use super::disk_cache::{DEFAULT_MAX_CACHE_SIZE, DiskCacheStats, DiskImageCache};
use super::http_transport::HttpTransport;
use super::location::{ResourceLocation, read_local};
use super::memory_cache::{CacheStats, DEFAULT_MEMORY_BUDGET, MemoryImageCache};

/// Configuration for the image loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageLoaderConfig {
    /// Byte budget of decoded images kept in memory.
    pub memory_budget_bytes: usize,
    /// Byte budget of downloaded files kept on disk.
    pub disk_budget_bytes: u64,
    /// Concurrent downloads.
    pub network_workers: usize,
    /// Concurrent probes and decodes.
    pub decode_workers: usize,
    /// Pixel format used when a request names none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_pixel_format: Option<PixelFormat>,
    /// Disk cache directory. Defaults to the user cache directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// User agent sent with downloads.
    pub user_agent: String,
    /// Number of local files whose dimensions are remembered. Zero disables it.
    pub local_dimension_memo: usize,
}

impl Default for ImageLoaderConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET,
            disk_budget_bytes: DEFAULT_MAX_CACHE_SIZE,
            network_workers: 4,
            decode_workers: 2,
            default_pixel_format: None,
            cache_dir: None,
            timeout_secs: 30,
            user_agent: concat!("pixcache/", env!("CARGO_PKG_VERSION")).to_string(),
            local_dimension_memo: 256,
        }
    }
}

/// Snapshot of the loader's caches, trackers and pools.
#[derive(Debug, Clone)]
pub struct LoaderStats {
    /// Memory cache usage.
    pub memory: CacheStats,
    /// Disk cache usage.
    pub disk: DiskCacheStats,
    /// Pending operations per phase.
    pub pending: PendingCounts,
    /// Network pool counters.
    pub network: PoolStats,
    /// Decode pool counters.
    pub decode: PoolStats,
}

impl std::fmt::Display for LoaderStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.memory)?;
        writeln!(f, "{}", self.disk)?;
        writeln!(f, "Pending: {}", self.pending)?;
        writeln!(f, "Network pool: {}", self.network)?;
        write!(f, "Decode pool: {}", self.decode)
    }
}

/// Queued items by operation, so joins can bump them and cancels can drop them.
#[derive(Default)]
struct Scheduled {
    by_key: HashMap<OperationKey, Arc<Prioritizable>>,
    by_task: HashMap<TaskId, OperationKey>,
}

impl Scheduled {
    fn insert(&mut self, key: OperationKey, item: Arc<Prioritizable>) {
        self.by_task.insert(item.id(), key.clone());
        if let Some(old) = self.by_key.insert(key, item) {
            self.by_task.remove(&old.id());
        }
    }

    fn remove_key(&mut self, key: &OperationKey) -> Option<Arc<Prioritizable>> {
        let item = self.by_key.remove(key)?;
        self.by_task.remove(&item.id());
        Some(item)
    }

    /// Forgets a task. Returns its key only if the task was the live item
    /// for that key.
    fn remove_task(&mut self, id: TaskId) -> Option<OperationKey> {
        let key = self.by_task.remove(&id)?;
        if self.by_key.get(&key).is_some_and(|item| item.id() == id) {
            self.by_key.remove(&key);
            Some(key)
        } else {
            None
        }
    }
}

struct LoaderShared {
    coordinator: OperationCoordinator,
    memory: MemoryImageCache,
    disk: Arc<DiskImageCache>,
    transport: Arc<dyn Transport>,
    decoder: Arc<dyn ImageDecoderPort>,
    network: WorkerPool,
    decode: WorkerPool,
    scheduled: Mutex<Scheduled>,
    local_dimensions: Option<Mutex<LruCache<String, Dimensions>>>,
    next_handle: AtomicU64,
    closed: AtomicBool,
}

impl LoaderShared {
    fn next_handle(&self) -> RequestHandle {
        RequestHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn pool_for(&self, key: &OperationKey) -> &WorkerPool {
        match key {
            OperationKey::Network(_) => &self.network,
            OperationKey::Metadata(_) | OperationKey::Decode(_) => &self.decode,
        }
    }

    fn known_dimensions(&self, uri: &str, location: &ResourceLocation) -> Option<Dimensions> {
        match location {
            ResourceLocation::Remote(_) => self.disk.dimensions(uri),
            ResourceLocation::Local(_) => self
                .local_dimensions
                .as_ref()
                .and_then(|memo| memo.lock().get(uri).copied()),
        }
    }

    fn remember_dimensions(&self, uri: &str, location: &ResourceLocation, dimensions: Dimensions) {
        match location {
            ResourceLocation::Remote(_) => {
                if let Err(e) = self.disk.set_dimensions(uri, dimensions) {
                    warn!(uri, error = %e, "Failed to record dimensions");
                }
            }
            ResourceLocation::Local(_) => {
                if let Some(memo) = &self.local_dimensions {
                    memo.lock().put(uri.to_string(), dimensions);
                }
            }
        }
    }

    fn from_memory(
        &self,
        uri: &str,
        dimensions: Option<Dimensions>,
        params: &ListenerParams,
    ) -> Option<LoadedImage> {
        let signature = self.coordinator.signature_for(uri, dimensions?, params)?;
        let image = self.memory.get(&signature)?;
        Some(LoadedImage {
            signature,
            image,
            source: ImageSource::MemoryCache,
        })
    }

    /// Joins the listener to pending work or starts new work for it.
    fn enqueue(
        self: &Arc<Self>,
        uri: &str,
        location: &ResourceLocation,
        params: ListenerParams,
        placement: Option<CacheKey>,
        dimensions: Option<Dimensions>,
    ) -> RequestHandle {
        let handle = self.next_handle();
        let class = PriorityClass::for_request(params.priority, placement.is_some()).index();

        let status = self
            .coordinator
            .queue_if_pending(uri, handle, params.clone(), dimensions);
        if let Some(key) = status.key(uri) {
            trace!(uri, %handle, operation = %key, "Joined pending operation");
            self.reschedule(&key, class);
            return handle;
        }

        if !location.is_local() && !self.disk.is_cached(uri) {
            if self.coordinator.start_network(uri, handle, params) {
                let key = OperationKey::Network(uri.to_string());
                self.schedule(key, class, placement, ImageSource::Network);
            }
            return handle;
        }

        let origin = if location.is_local() {
            ImageSource::LocalFile
        } else {
            ImageSource::DiskCache
        };
        let signature =
            dimensions.and_then(|dims| self.coordinator.signature_for(uri, dims, &params));
        match signature {
            Some(signature) => {
                if self
                    .coordinator
                    .start_decode(signature.clone(), handle, params)
                {
                    self.schedule(OperationKey::Decode(signature), class, placement, origin);
                }
            }
            None => {
                if self.coordinator.start_metadata(uri, handle, params) {
                    let key = OperationKey::Metadata(uri.to_string());
                    self.schedule(key, class, placement, origin);
                }
            }
        }
        handle
    }

    fn schedule(
        self: &Arc<Self>,
        key: OperationKey,
        class: usize,
        placement: Option<CacheKey>,
        origin: ImageSource,
    ) {
        let shared = Arc::clone(self);
        let job = key.clone();
        let item = Prioritizable::new(key.to_string(), placement, move || shared.run(job, origin));
        let pool = self.pool_for(&key);
        trace!(operation = %key, class, pool = pool.name(), "Scheduling");

        let evicted = {
            let mut scheduled = self.scheduled.lock();
            scheduled.insert(key, Arc::clone(&item));
            pool.submit(item, class)
        };
        self.abandon_evicted(evicted);
    }

    /// Moves a queued operation forward after another listener joined it.
    fn reschedule(&self, key: &OperationKey, class: usize) {
        let Some(item) = self.scheduled.lock().by_key.get(key).cloned() else {
            return;
        };
        let pool = self.pool_for(key);
        if class < item.class() {
            if let Some(evicted) = pool.promote(&item, class) {
                debug!(operation = %key, class, "Promoted queued operation");
                self.abandon_evicted(evicted);
            }
        } else if pool.bump(&item) {
            trace!(operation = %key, "Bumped queued operation");
        }
    }

    /// Fails the listeners of operations whose items will never run.
    fn abandon_evicted(&self, items: Vec<Arc<Prioritizable>>) {
        if items.is_empty() {
            return;
        }
        let keys: Vec<OperationKey> = {
            let mut scheduled = self.scheduled.lock();
            items
                .iter()
                .filter_map(|item| scheduled.remove_task(item.id()))
                .collect()
        };
        for key in keys {
            let error = LoadError::evicted(key.uri());
            self.coordinator.abandon(&key, &error);
        }
    }

    /// Forgets the finished item of `key`, returning its class and placement
    /// for the next phase.
    fn release(&self, key: &OperationKey) -> (usize, Option<CacheKey>) {
        let mut scheduled = self.scheduled.lock();
        let Some(item) = scheduled.by_key.get(key).cloned() else {
            return (PriorityClass::Visible.index(), None);
        };
        if !item.is_queued() {
            scheduled.remove_key(key);
        }
        (item.class(), item.placement())
    }

    fn cancel(&self, handle: RequestHandle) -> bool {
        let mut scheduled = self.scheduled.lock();
        let Some(outcome) = self.coordinator.cancel(handle) else {
            return false;
        };
        if outcome.key_removed
            && let Some(item) = scheduled.by_key.get(&outcome.key).cloned()
            && item.cancel()
        {
            scheduled.remove_key(&outcome.key);
            debug!(%handle, operation = %outcome.key, "Cancelled queued operation");
        } else {
            trace!(%handle, operation = %outcome.key, "Listener removed");
        }
        true
    }

    fn run(self: &Arc<Self>, key: OperationKey, origin: ImageSource) -> Completion {
        let shared = Arc::clone(self);
        match key {
            OperationKey::Network(uri) => {
                let result = self.download(&uri);
                Box::new(move || shared.finish_download(&uri, result))
            }
            OperationKey::Metadata(uri) => {
                let result = self.probe(&uri);
                Box::new(move || shared.finish_metadata(&uri, result, origin))
            }
            OperationKey::Decode(signature) => {
                let result = self.decode(&signature, origin);
                Box::new(move || shared.finish_decode(&signature, result))
            }
        }
    }

    fn read_source(&self, uri: &str, location: &ResourceLocation) -> LoadResult<Bytes> {
        match location {
            ResourceLocation::Local(path) => read_local(uri, path),
            ResourceLocation::Remote(_) => match self.disk.read(uri) {
                Ok(bytes) => Ok(bytes),
                Err(CacheError::NotFound(_)) => self.refetch(uri),
                Err(e) => Err(LoadError::transport(uri, format!("cached file unavailable: {e}"))),
            },
        }
    }

    /// Fetches a remote source again after its cached file was evicted or
    /// removed between download and decode.
    fn refetch(&self, uri: &str) -> LoadResult<Bytes> {
        debug!(uri, "Cached file gone, fetching again");
        let bytes = self.transport.fetch(uri)?;
        if let Err(e) = self.disk.store(uri, &mut &bytes[..]) {
            warn!(uri, error = %e, "Failed to cache refetched file");
        }
        Ok(bytes)
    }

    fn download(&self, uri: &str) -> LoadResult<u64> {
        let bytes = self.transport.fetch(uri)?;
        let mut reader: &[u8] = &bytes;
        self.disk
            .store(uri, &mut reader)
            .map_err(|e| LoadError::transport(uri, format!("failed to cache download: {e}")))
    }

    fn probe(&self, uri: &str) -> LoadResult<Dimensions> {
        let location = ResourceLocation::parse(uri)?;
        let bytes = self.read_source(uri, &location)?;
        let dimensions = self.decoder.probe_dimensions(uri, &bytes)?;
        self.remember_dimensions(uri, &location, dimensions);
        Ok(dimensions)
    }

    fn decode(&self, signature: &DecodeSignature, origin: ImageSource) -> LoadResult<LoadedImage> {
        if let Some(image) = self.memory.peek(signature) {
            return Ok(LoadedImage {
                signature: signature.clone(),
                image,
                source: ImageSource::MemoryCache,
            });
        }
        let location = ResourceLocation::parse(&signature.uri)?;
        let bytes = self.read_source(&signature.uri, &location)?;
        let image = Arc::new(self.decoder.decode(&bytes, signature)?);
        self.memory.put(signature.clone(), Arc::clone(&image));
        Ok(LoadedImage {
            signature: signature.clone(),
            image,
            source: origin,
        })
    }

    fn finish_download(self: &Arc<Self>, uri: &str, result: LoadResult<u64>) {
        let (class, placement) = self.release(&OperationKey::Network(uri.to_string()));
        match result {
            Ok(_) => {
                if self.coordinator.on_download_complete(uri) {
                    let key = OperationKey::Metadata(uri.to_string());
                    self.schedule(key, class, placement, ImageSource::Network);
                }
            }
            Err(e) => {
                self.coordinator.on_download_failed(uri, &e);
            }
        }
    }

    fn finish_metadata(self: &Arc<Self>, uri: &str, result: LoadResult<Dimensions>, origin: ImageSource) {
        let (class, placement) = self.release(&OperationKey::Metadata(uri.to_string()));
        match result {
            Ok(dimensions) => {
                for signature in self.coordinator.on_metadata_complete(uri, dimensions) {
                    self.decode_or_serve(signature, class, placement, origin);
                }
            }
            Err(e) => {
                self.discard_source(uri, &e);
                self.coordinator.on_metadata_failed(uri, &e);
            }
        }
    }

    fn decode_or_serve(
        self: &Arc<Self>,
        signature: DecodeSignature,
        class: usize,
        placement: Option<CacheKey>,
        origin: ImageSource,
    ) {
        match self.memory.get(&signature) {
            Some(image) => {
                let loaded = LoadedImage {
                    signature: signature.clone(),
                    image,
                    source: ImageSource::MemoryCache,
                };
                self.coordinator.on_decode_complete(&signature, &Ok(loaded));
            }
            None => self.schedule(OperationKey::Decode(signature), class, placement, origin),
        }
    }

    fn finish_decode(&self, signature: &DecodeSignature, result: LoadResult<LoadedImage>) {
        self.release(&OperationKey::Decode(signature.clone()));
        if let Err(e) = &result {
            self.discard_source(&signature.uri, e);
        }
        self.coordinator.on_decode_complete(signature, &result);
    }

    /// Drops a downloaded file that could not be probed or decoded.
    fn discard_source(&self, uri: &str, error: &LoadError) {
        let undecodable = matches!(
            error,
            LoadError::DecodeFailure { .. } | LoadError::MetadataFailure { .. }
        );
        if undecodable
            && matches!(ResourceLocation::parse(uri), Ok(ResourceLocation::Remote(_)))
            && self.disk.remove(uri)
        {
            debug!(uri, "Removed undecodable file from disk cache");
        }
    }
}

/// Orchestrates image loading from memory, disk, and network.
pub struct ImageLoader {
    shared: Arc<LoaderShared>,
    config: ImageLoaderConfig,
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ImageLoader {
    /// Creates a loader over explicit adapters and starts its worker pools.
    ///
    /// # Errors
    /// Returns error if a worker thread cannot be spawned.
    pub fn new(
        config: ImageLoaderConfig,
        event_tx: mpsc::UnboundedSender<ImageLoadedEvent>,
        disk_cache: Arc<DiskImageCache>,
        transport: Arc<dyn Transport>,
        decoder: Arc<dyn ImageDecoderPort>,
    ) -> CacheResult<Self> {
        let network = WorkerPool::start("pixcache-net", config.network_workers)?;
        let decode = WorkerPool::start("pixcache-decode", config.decode_workers)?;
        let local_dimensions = NonZeroUsize::new(config.local_dimension_memo)
            .map(|capacity| Mutex::new(LruCache::new(capacity)));

        info!(
            memory_budget = config.memory_budget_bytes,
            disk_budget = disk_cache.budget(),
            network_workers = config.network_workers,
            decode_workers = config.decode_workers,
            "Image loader started"
        );

        let shared = Arc::new(LoaderShared {
            coordinator: OperationCoordinator::new(event_tx, config.default_pixel_format),
            memory: MemoryImageCache::new(config.memory_budget_bytes),
            disk: disk_cache,
            transport,
            decoder,
            network,
            decode,
            scheduled: Mutex::new(Scheduled::default()),
            local_dimensions,
            next_handle: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        Ok(Self { shared, config })
    }

    /// Creates a loader with the HTTP transport and `image` crate decoder.
    ///
    /// Downloads run on `runtime`; the loader's own threads block on it, so
    /// it must be a multi-threaded runtime that outlives the loader.
    ///
    /// # Errors
    /// Returns error if disk cache or HTTP client cannot be created.
    pub fn from_config(
        config: ImageLoaderConfig,
        event_tx: mpsc::UnboundedSender<ImageLoadedEvent>,
        runtime: Handle,
    ) -> CacheResult<Self> {
        let disk_cache = match &config.cache_dir {
            Some(dir) => DiskImageCache::open_in(dir, config.disk_budget_bytes)?,
            None => DiskImageCache::default_location(config.disk_budget_bytes)?,
        };
        let transport = HttpTransport::new(
            runtime,
            Duration::from_secs(config.timeout_secs),
            &config.user_agent,
        )
        .map_err(|e| CacheError::IoError(format!("Failed to create HTTP client: {e}")))?;

        Self::new(
            config,
            event_tx,
            Arc::new(disk_cache),
            Arc::new(transport),
            Arc::new(ImageCrateDecoder::new()),
        )
    }

    /// Returns the configuration the loader was created with.
    #[must_use]
    pub const fn config(&self) -> &ImageLoaderConfig {
        &self.config
    }

    /// Returns the disk cache.
    #[must_use]
    pub fn disk_cache(&self) -> &Arc<DiskImageCache> {
        &self.shared.disk
    }

    fn ensure_open(&self) -> LoadResult<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(LoadError::invalid("loader is shut down"));
        }
        Ok(())
    }

    /// Requests an image.
    ///
    /// Returns `Ready` when the exact decode is already in memory. Otherwise
    /// the request is queued and its result arrives exactly once as an
    /// [`ImageLoadedEvent`] carrying the returned handle.
    ///
    /// # Errors
    /// Returns `InvalidRequest` for blank or unsupported URIs and
    /// `NotFoundLocally` for missing local files. Nothing is queued then.
    pub fn request(&self, request: ResourceRequest) -> LoadResult<RequestOutcome> {
        self.ensure_open()?;
        let location = ResourceLocation::parse(&request.uri)?;
        location.ensure_exists()?;

        let uri = request.uri.as_str();
        let params = ListenerParams::deliver(request.bounds, request.format, request.priority);
        let dimensions = self.shared.known_dimensions(uri, &location);
        if let Some(loaded) = self.shared.from_memory(uri, dimensions, &params) {
            trace!(uri, signature = %loaded.signature, "Memory cache hit");
            return Ok(RequestOutcome::Ready(loaded));
        }

        let handle = self
            .shared
            .enqueue(uri, &location, params, request.placement, dimensions);
        debug!(uri, %handle, priority = %request.priority, "Request queued");
        Ok(RequestOutcome::Queued(handle))
    }

    /// Removes a queued request. Its event is never sent. When it was the
    /// last listener of a queued operation, the operation is cancelled too.
    /// Returns false if the handle is unknown or already delivered.
    pub fn cancel(&self, handle: RequestHandle) -> bool {
        self.shared.cancel(handle)
    }

    /// Downloads `uri` into the disk cache without decoding it.
    ///
    /// Returns `None` if nothing needed to be done. No event is sent.
    ///
    /// # Errors
    /// Same synchronous errors as [`request`](Self::request).
    pub fn precache_to_disk(&self, uri: &str) -> LoadResult<Option<RequestHandle>> {
        self.ensure_open()?;
        let location = ResourceLocation::parse(uri)?;
        location.ensure_exists()?;
        if location.is_local() || self.shared.disk.bump(uri) {
            trace!(uri, "Precache to disk not needed");
            return Ok(None);
        }

        let params = ListenerParams::precache(TargetBounds::ORIGINAL, None, Intent::PrecacheDisk);
        let handle = self.shared.enqueue(uri, &location, params, None, None);
        debug!(uri, %handle, "Disk precache queued");
        Ok(Some(handle))
    }

    /// Decodes `uri` for `bounds` into the memory cache.
    ///
    /// Returns `None` if the decode is already resident. No event is sent.
    ///
    /// # Errors
    /// Same synchronous errors as [`request`](Self::request).
    pub fn precache_to_memory(
        &self,
        uri: &str,
        bounds: TargetBounds,
    ) -> LoadResult<Option<RequestHandle>> {
        self.ensure_open()?;
        let location = ResourceLocation::parse(uri)?;
        location.ensure_exists()?;

        let params = ListenerParams::precache(bounds, None, Intent::PrecacheMemory);
        let dimensions = self.shared.known_dimensions(uri, &location);
        if self.shared.from_memory(uri, dimensions, &params).is_some() {
            trace!(uri, "Precache to memory not needed");
            return Ok(None);
        }

        let handle = self
            .shared
            .enqueue(uri, &location, params, None, dimensions);
        debug!(uri, %handle, "Memory precache queued");
        Ok(Some(handle))
    }

    /// Changes the memory budget. Returns how many decodes were evicted.
    pub fn set_memory_budget(&self, bytes: usize) -> usize {
        self.shared.memory.set_budget(bytes)
    }

    /// Changes the disk budget. Eviction runs on the decode pool.
    pub fn set_disk_budget(&self, bytes: u64) {
        let disk = Arc::clone(&self.shared.disk);
        let item = Prioritizable::new(format!("maintenance:disk-budget:{bytes}"), None, move || {
            let evicted = disk.set_budget(bytes);
            debug!(budget = bytes, evicted, "Disk budget applied");
            no_completion()
        });
        let rejected = self
            .shared
            .decode
            .submit(item, PriorityClass::Visible.index());
        if !rejected.is_empty() {
            self.shared.disk.set_budget(bytes);
        }
    }

    /// Drops every decoded image from memory.
    pub fn clear_memory_cache(&self) {
        self.shared.memory.clear();
    }

    /// Moves a consumer's deprioritized look-ahead back into the precache
    /// range classes.
    pub fn prioritize_consumer(&self, consumer: ConsumerId) {
        for pool in [&self.shared.network, &self.shared.decode] {
            let evicted = pool.relocate_consumer(
                consumer,
                PriorityClass::Deprioritized.index(),
                PriorityClass::MemoryPrecacheRange.index(),
                PriorityClass::DiskPrecacheRange.index(),
            );
            self.shared.abandon_evicted(evicted);
        }
        debug!(%consumer, "Consumer prioritized");
    }

    /// Moves a consumer's look-ahead behind every other precache.
    pub fn deprioritize_consumer(&self, consumer: ConsumerId) {
        for pool in [&self.shared.network, &self.shared.decode] {
            for from in [
                PriorityClass::MemoryPrecacheRange,
                PriorityClass::DiskPrecacheRange,
            ] {
                let evicted = pool.demote_consumer(
                    consumer,
                    from.index(),
                    PriorityClass::Deprioritized.index(),
                );
                self.shared.abandon_evicted(evicted);
            }
        }
        debug!(%consumer, "Consumer deprioritized");
    }

    /// Returns loader statistics.
    #[must_use]
    pub fn stats(&self) -> LoaderStats {
        LoaderStats {
            memory: self.shared.memory.stats(),
            disk: self.shared.disk.stats(),
            pending: self.shared.coordinator.pending(),
            network: self.shared.network.stats(),
            decode: self.shared.decode.stats(),
        }
    }

    /// Stops both pools. Running work finishes; queued work is dropped and
    /// its listeners receive `Evicted`. Later requests are rejected. Safe to
    /// call more than once.
    pub fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut backlog = self.shared.network.shutdown();
        backlog.extend(self.shared.decode.shutdown());
        let dropped = backlog.len();
        self.shared.abandon_evicted(backlog);
        *self.shared.scheduled.lock() = Scheduled::default();
        info!(dropped, "Image loader shut down");
    }
}

impl Drop for ImageLoader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use image::DynamicImage;
    use tempfile::TempDir;

    use super::*;
    use crate::domain::entities::DecodedImage;
    use crate::domain::ports::mocks::{MockImageDecoderPort, MockTransport};

    const URI: &str = "https://example.com/a.png";

    fn loader_with(
        transport: MockTransport,
        decoder: MockImageDecoderPort,
    ) -> (ImageLoader, mpsc::UnboundedReceiver<ImageLoadedEvent>, TempDir) {
        let temp = TempDir::new().unwrap();
        let disk = DiskImageCache::open_in(temp.path(), 1024 * 1024).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let loader = ImageLoader::new(
            ImageLoaderConfig::default(),
            tx,
            Arc::new(disk),
            Arc::new(transport),
            Arc::new(decoder),
        )
        .unwrap();
        (loader, rx, temp)
    }

    fn working_decoder() -> MockImageDecoderPort {
        let mut decoder = MockImageDecoderPort::new();
        decoder
            .expect_probe_dimensions()
            .returning(|_, _| Ok(Dimensions::new(512, 512)));
        decoder.expect_decode().returning(|_, signature| {
            let side = 512 / signature.sample_size;
            Ok(DecodedImage::new(DynamicImage::new_rgba8(side, side), None))
        });
        decoder
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ImageLoadedEvent>) -> ImageLoadedEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[test]
    fn test_invalid_requests_fail_synchronously() {
        let (loader, _rx, _temp) = loader_with(MockTransport::new(), MockImageDecoderPort::new());

        let blank = loader.request(ResourceRequest::new("  "));
        assert!(matches!(blank, Err(LoadError::InvalidRequest { .. })));

        let missing = loader.request(ResourceRequest::new("/definitely/not/here.png"));
        assert!(matches!(missing, Err(LoadError::NotFoundLocally { .. })));
        assert_eq!(loader.stats().pending, PendingCounts::default());
    }

    #[tokio::test]
    async fn test_download_probe_and_decode() {
        let mut transport = MockTransport::new();
        transport
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(Bytes::from_static(b"encoded")));
        let (loader, mut rx, _temp) = loader_with(transport, working_decoder());

        let outcome = loader
            .request(ResourceRequest::new(URI).with_bounds(TargetBounds::width(256)))
            .unwrap();
        let handle = outcome.handle().unwrap();

        let event = next_event(&mut rx).await;
        assert_eq!(event.handle, handle);
        let loaded = event.result.unwrap();
        assert_eq!(loaded.source, ImageSource::Network);
        assert_eq!(loaded.signature.sample_size, 2);
        assert_eq!(loaded.image.width(), 256);

        assert!(loader.disk_cache().is_cached(URI));
        assert_eq!(
            loader.disk_cache().dimensions(URI),
            Some(Dimensions::new(512, 512))
        );
    }

    #[tokio::test]
    async fn test_repeat_request_is_served_from_memory() {
        let mut transport = MockTransport::new();
        transport
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(Bytes::from_static(b"encoded")));
        let (loader, mut rx, _temp) = loader_with(transport, working_decoder());

        let request = ResourceRequest::new(URI).with_bounds(TargetBounds::width(256));
        loader.request(request.clone()).unwrap();
        next_event(&mut rx).await.result.unwrap();

        match loader.request(request).unwrap() {
            RequestOutcome::Ready(loaded) => assert_eq!(loaded.source, ImageSource::MemoryCache),
            RequestOutcome::Queued(_) => panic!("expected a memory hit"),
        }
    }

    #[tokio::test]
    async fn test_transport_failure_reaches_listener() {
        let mut transport = MockTransport::new();
        transport
            .expect_fetch()
            .returning(|uri| Err(LoadError::transport(uri, "HTTP 404 Not Found")));
        let (loader, mut rx, _temp) = loader_with(transport, MockImageDecoderPort::new());

        loader.request(ResourceRequest::new(URI)).unwrap();
        let event = next_event(&mut rx).await;
        assert!(matches!(event.result, Err(LoadError::TransportFailure { .. })));
        assert!(!loader.disk_cache().is_cached(URI));
    }

    #[tokio::test]
    async fn test_decode_failure_removes_downloaded_file() {
        let mut transport = MockTransport::new();
        transport
            .expect_fetch()
            .returning(|_| Ok(Bytes::from_static(b"garbage")));
        let mut decoder = MockImageDecoderPort::new();
        decoder
            .expect_probe_dimensions()
            .returning(|_, _| Ok(Dimensions::new(64, 64)));
        decoder
            .expect_decode()
            .returning(|_, signature| Err(LoadError::decode(&signature.uri, "bad header")));
        let (loader, mut rx, _temp) = loader_with(transport, decoder);

        loader.request(ResourceRequest::new(URI)).unwrap();
        let event = next_event(&mut rx).await;
        assert!(matches!(event.result, Err(LoadError::DecodeFailure { .. })));
        assert!(!loader.disk_cache().is_cached(URI));
    }

    #[tokio::test]
    async fn test_disk_precache_sends_no_event() {
        let mut transport = MockTransport::new();
        transport
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(Bytes::from_static(b"encoded")));
        let (loader, mut rx, _temp) = loader_with(transport, working_decoder());

        let handle = loader.precache_to_disk(URI).unwrap();
        assert!(handle.is_some());

        for _ in 0..100 {
            if loader.disk_cache().is_cached(URI) && loader.stats().pending.listeners == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(loader.disk_cache().is_cached(URI));
        assert_eq!(loader.precache_to_disk(URI).unwrap(), None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_requests_rejected_after_shutdown() {
        let (loader, _rx, _temp) = loader_with(MockTransport::new(), MockImageDecoderPort::new());
        loader.shutdown();
        loader.shutdown();
        assert!(matches!(
            loader.request(ResourceRequest::new(URI)),
            Err(LoadError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn test_config_defaults_from_empty_toml() {
        let config: ImageLoaderConfig = toml::from_str("network_workers = 8").unwrap();
        assert_eq!(config.network_workers, 8);
        assert_eq!(config.decode_workers, 2);
        assert_eq!(config.memory_budget_bytes, DEFAULT_MEMORY_BUDGET);
        assert!(config.user_agent.starts_with("pixcache/"));
    }
}
