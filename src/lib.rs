//! pixcache - A client-side image fetch-and-cache engine.
//!
//! Requests are deduplicated across the network, metadata and decode phases,
//! scheduled on prioritized worker pools, and served from a byte-budgeted
//! memory cache backed by a journaled disk cache.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing scheduling, operation tracking and DTOs.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing caches and adapters for external services.
pub mod infrastructure;

pub use application::{ImageLoadedEvent, RequestOutcome};
pub use domain::entities::{
    CacheKey, ConsumerId, LookAhead, PixelFormat, Priority, RequestHandle, ResourceRequest,
    TargetBounds,
};
pub use domain::{LoadError, LoadResult};
pub use infrastructure::{ImageLoader, ImageLoaderConfig};

/// Current version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = "pixcache";
