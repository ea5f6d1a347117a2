//! Infrastructure layer with external service adapters.

/// Application configuration.
pub mod config;
/// Image handling (caching, transport, decoding, loading).
pub mod image;

pub use config::{AppConfig, AppPaths, CliArgs, Command, ConfigError, LogLevel};
pub use image::{
    CacheStats, DiskImageCache, HttpTransport, ImageCrateDecoder, ImageLoader, ImageLoaderConfig,
    LoaderStats, MemoryImageCache,
};
