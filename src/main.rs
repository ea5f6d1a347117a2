use std::collections::HashSet;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use pixcache::application::ImageLoadedEvent;
use pixcache::infrastructure::{AppConfig, AppPaths, CliArgs, Command, DiskImageCache, ImageLoader};
use pixcache::{PixelFormat, RequestHandle, RequestOutcome, ResourceRequest, TargetBounds};

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = config.effective_log_path() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(true);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let paths = AppPaths::resolve()?;
    let mut config = paths.load_config(args.config.as_deref())?;
    config.merge_with_args(args);
    Ok(config)
}

fn bounds_from(width: Option<u32>, height: Option<u32>) -> TargetBounds {
    TargetBounds { width, height }
}

fn open_disk_cache(config: &AppConfig) -> Result<DiskImageCache> {
    let budget = config.cache.disk_budget_bytes;
    let cache = match &config.cache.cache_dir {
        Some(dir) => DiskImageCache::open_in(dir, budget)?,
        None => DiskImageCache::default_location(budget)?,
    };
    Ok(cache)
}

fn print_event(event: &ImageLoadedEvent) {
    match &event.result {
        Ok(loaded) => println!(
            "{} {}x{} sample 1/{} from {}",
            event.uri,
            loaded.image.width(),
            loaded.image.height(),
            loaded.signature.sample_size,
            loaded.source
        ),
        Err(e) => println!("{} failed: {e}", event.uri),
    }
}

async fn fetch(
    config: AppConfig,
    uris: Vec<String>,
    bounds: TargetBounds,
    format: Option<PixelFormat>,
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let loader = ImageLoader::from_config(config.cache, tx, tokio::runtime::Handle::current())
        .wrap_err("failed to start image loader")?;

    let mut waiting: HashSet<RequestHandle> = HashSet::new();
    for uri in uris {
        let mut request = ResourceRequest::new(uri.clone()).with_bounds(bounds);
        if let Some(format) = format {
            request = request.with_format(format);
        }
        match loader.request(request) {
            Ok(RequestOutcome::Ready(loaded)) => println!(
                "{uri} {}x{} from {}",
                loaded.image.width(),
                loaded.image.height(),
                loaded.source
            ),
            Ok(RequestOutcome::Queued(handle)) => {
                waiting.insert(handle);
            }
            Err(e) => println!("{uri} rejected: {e}"),
        }
    }

    while !waiting.is_empty() {
        let Some(event) = rx.recv().await else {
            warn!(remaining = waiting.len(), "Event channel closed");
            break;
        };
        if waiting.remove(&event.handle) {
            print_event(&event);
        }
    }

    println!("{}", loader.stats());
    tokio::task::spawn_blocking(move || loader.shutdown()).await?;
    Ok(())
}

async fn precache(
    config: AppConfig,
    uris: Vec<String>,
    memory: bool,
    bounds: TargetBounds,
) -> Result<()> {
    let (tx, _rx) = mpsc::unbounded_channel();
    let loader = ImageLoader::from_config(config.cache, tx, tokio::runtime::Handle::current())
        .wrap_err("failed to start image loader")?;

    for uri in &uris {
        let queued = if memory {
            loader.precache_to_memory(uri, bounds)
        } else {
            loader.precache_to_disk(uri)
        };
        match queued {
            Ok(Some(handle)) => info!(uri, %handle, "Precache queued"),
            Ok(None) => println!("{uri} already cached"),
            Err(e) => println!("{uri} rejected: {e}"),
        }
    }

    while loader.stats().pending.listeners > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    println!("{}", loader.stats());
    tokio::task::spawn_blocking(move || loader.shutdown()).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args)?;
    init_logging(&config)?;

    info!(version = pixcache::VERSION, "Starting pixcache");

    match args.command {
        Command::Fetch {
            uris,
            width,
            height,
            format,
        } => fetch(config, uris, bounds_from(width, height), format).await,
        Command::Precache {
            uris,
            memory,
            width,
            height,
        } => precache(config, uris, memory, bounds_from(width, height)).await,
        Command::Stats => {
            println!("{}", open_disk_cache(&config)?.stats());
            Ok(())
        }
        Command::Clear => {
            let cache = open_disk_cache(&config)?;
            let before = cache.stats();
            cache.clear()?;
            println!("Removed {} files ({} bytes)", before.on_disk, before.bytes);
            Ok(())
        }
    }
}
