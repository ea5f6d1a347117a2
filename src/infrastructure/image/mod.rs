//! Image handling infrastructure.
//!
//! This module provides:
//! - Memory caching with byte-budgeted LRU eviction
//! - Disk caching with a journaled metadata table
//! - HTTP transport and `image` crate decoding
//! - The loading pipeline that ties them together

pub mod decoder;
pub mod disk_cache;
pub mod file_store;
pub mod http_transport;
pub mod loader;
pub mod location;
pub mod memory_cache;
pub mod metadata_journal;

pub use decoder::ImageCrateDecoder;
pub use disk_cache::{DiskCacheStats, DiskImageCache};
pub use file_store::FileByteStore;
pub use http_transport::HttpTransport;
pub use loader::{ImageLoader, ImageLoaderConfig, LoaderStats};
pub use location::ResourceLocation;
pub use memory_cache::{CacheStats, MemoryImageCache};
pub use metadata_journal::{InMemoryMetadataStore, JournalMetadataStore};
