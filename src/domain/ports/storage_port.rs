//! Ports for the disk cache's byte storage and durable metadata.

use std::io::Read;

use bytes::Bytes;

use crate::domain::entities::CacheEntry;

/// Result type for cache storage operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors that can occur during cache storage operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// Entry not found in the store.
    #[error("Not found: {0}")]
    NotFound(String),
    /// I/O error during a store operation.
    #[error("IO error: {0}")]
    IoError(String),
    /// The metadata journal could not be read or written.
    #[error("Journal error: {0}")]
    JournalError(String),
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        Self::JournalError(e.to_string())
    }
}

/// Keyed blob storage for downloaded source files.
/// Implementations must be thread-safe.
pub trait ByteStore: Send + Sync {
    /// Streams `source` into the blob for `key`, replacing any previous blob.
    /// Returns the number of bytes written.
    ///
    /// # Errors
    /// Returns error if the blob cannot be written.
    fn write(&self, key: &str, source: &mut dyn Read) -> CacheResult<u64>;

    /// Reads the whole blob for `key`.
    ///
    /// # Errors
    /// Returns `CacheError::NotFound` if no blob exists.
    fn read(&self, key: &str) -> CacheResult<Bytes>;

    /// Deletes the blob for `key`. Deleting a missing blob succeeds.
    ///
    /// # Errors
    /// Returns error if an existing blob cannot be removed.
    fn delete(&self, key: &str) -> CacheResult<()>;

    /// Returns true if a blob exists for `key`.
    fn exists(&self, key: &str) -> bool;

    /// Returns the blob size, if it exists.
    fn size_of(&self, key: &str) -> Option<u64>;
}

/// Durable key-value table of disk cache rows keyed by URI.
///
/// Callers serialize access; implementations need not lock internally.
pub trait MetadataStore: Send {
    /// Inserts or replaces the row for `entry.uri`.
    ///
    /// # Errors
    /// Returns error if the change cannot be persisted.
    fn upsert(&mut self, entry: CacheEntry) -> CacheResult<()>;

    /// Point lookup.
    fn get(&self, uri: &str) -> Option<CacheEntry>;

    /// Removes the row for `uri`, returning it.
    ///
    /// # Errors
    /// Returns error if the change cannot be persisted.
    fn remove(&mut self, uri: &str) -> CacheResult<Option<CacheEntry>>;

    /// Up to `limit` on-disk rows in ascending last-access order, ties by URI.
    fn oldest_on_disk(&self, limit: usize) -> Vec<CacheEntry>;

    /// Sum of `file_size_bytes` over all rows.
    fn total_size(&self) -> u64;

    /// Every row, in no particular order.
    fn entries(&self) -> Vec<CacheEntry>;

    /// Number of rows.
    fn len(&self) -> usize;

    /// Returns true if there are no rows.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every row.
    ///
    /// # Errors
    /// Returns error if the change cannot be persisted.
    fn clear(&mut self) -> CacheResult<()>;
}
