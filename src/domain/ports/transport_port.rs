//! Port for fetching resource bytes.

use bytes::Bytes;

use crate::domain::errors::LoadResult;

/// Fetches the raw bytes of a remote resource.
///
/// Called only from network worker threads; implementations may block.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Downloads the resource at `uri`.
    ///
    /// # Errors
    /// Returns `LoadError::TransportFailure` if the resource cannot be fetched.
    fn fetch(&self, uri: &str) -> LoadResult<Bytes>;
}
