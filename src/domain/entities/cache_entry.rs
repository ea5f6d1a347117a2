//! Disk cache metadata row.

use serde::{Deserialize, Serialize};

use super::Dimensions;

/// Persisted metadata for one downloaded source file.
///
/// A row with `on_disk == false` is provisional: its write has begun but
/// not finished, and it must never count as a cache hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Resource identifier.
    pub uri: String,
    /// Size of the backing file.
    pub file_size_bytes: u64,
    /// Source width, once probed.
    pub width: Option<u32>,
    /// Source height, once probed.
    pub height: Option<u32>,
    /// Milliseconds since the Unix epoch of the last read or write.
    pub last_access_time: u64,
    /// Whether the backing file has been completely written.
    pub on_disk: bool,
}

impl CacheEntry {
    /// Creates a provisional row for a write that is starting.
    #[must_use]
    pub fn provisional(uri: impl Into<String>, last_access_time: u64) -> Self {
        Self {
            uri: uri.into(),
            file_size_bytes: 0,
            width: None,
            height: None,
            last_access_time,
            on_disk: false,
        }
    }

    /// Returns the probed dimensions, if both are known.
    #[must_use]
    pub fn dimensions(&self) -> Option<Dimensions> {
        match (self.width, self.height) {
            (Some(width), Some(height)) => Some(Dimensions::new(width, height)),
            _ => None,
        }
    }

    /// Records probed dimensions.
    pub const fn set_dimensions(&mut self, dimensions: Dimensions) {
        self.width = Some(dimensions.width);
        self.height = Some(dimensions.height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisional_entry_is_not_on_disk() {
        let entry = CacheEntry::provisional("https://example.com/a.png", 7);
        assert!(!entry.on_disk);
        assert_eq!(entry.file_size_bytes, 0);
        assert!(entry.dimensions().is_none());
    }

    #[test]
    fn test_dimensions_need_both_axes() {
        let mut entry = CacheEntry::provisional("u", 0);
        entry.width = Some(10);
        assert!(entry.dimensions().is_none());
        entry.set_dimensions(Dimensions::new(10, 20));
        assert_eq!(entry.dimensions(), Some(Dimensions::new(10, 20)));
    }
}
