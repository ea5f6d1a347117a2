use super::app_config::LogLevel;
use crate::domain::entities::PixelFormat;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(
    name = "pixcache",
    version,
    about = "Fetch, decode and cache images with deduplicated, prioritized workers",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH", env = "PIXCACHE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Disk cache directory.
    #[arg(long, value_name = "PATH", env = "PIXCACHE_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Memory budget in bytes.
    #[arg(long, value_name = "BYTES")]
    pub memory_budget: Option<usize>,

    /// Disk budget in bytes.
    #[arg(long, value_name = "BYTES")]
    pub disk_budget: Option<u64>,

    /// Concurrent downloads.
    #[arg(long)]
    pub network_workers: Option<usize>,

    /// Concurrent decodes.
    #[arg(long)]
    pub decode_workers: Option<usize>,

    /// Request timeout in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load images and print what was decoded.
    Fetch {
        /// Image URIs: http(s) URLs, file:// URLs or absolute paths.
        #[arg(required = true)]
        uris: Vec<String>,
        /// Maximum display width.
        #[arg(long)]
        width: Option<u32>,
        /// Maximum display height.
        #[arg(long)]
        height: Option<u32>,
        /// Pixel format to convert to.
        #[arg(long, value_enum)]
        format: Option<PixelFormat>,
    },
    /// Warm the caches without printing images.
    Precache {
        /// Image URIs.
        #[arg(required = true)]
        uris: Vec<String>,
        /// Decode into memory instead of only downloading.
        #[arg(long)]
        memory: bool,
        /// Maximum display width for memory precache.
        #[arg(long)]
        width: Option<u32>,
        /// Maximum display height for memory precache.
        #[arg(long)]
        height: Option<u32>,
    },
    /// Print disk cache statistics.
    Stats,
    /// Delete every file in the disk cache.
    Clear,
}
