//! Shared fakes for loader integration tests.

#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use image::{DynamicImage, ImageFormat};
use parking_lot::{Condvar, Mutex};
use tokio::sync::mpsc;

use pixcache::application::ImageLoadedEvent;
use pixcache::domain::entities::{DecodeSignature, DecodedImage, Dimensions};
use pixcache::domain::ports::{ImageDecoderPort, Transport};
use pixcache::infrastructure::image::{DiskImageCache, ImageCrateDecoder};
use pixcache::{ImageLoader, ImageLoaderConfig, LoadError, LoadResult};

pub const DISK_BUDGET: u64 = 16 * 1024 * 1024;

/// Encodes a blank PNG.
pub fn png(width: u32, height: u32) -> Bytes {
    let mut buf = Vec::new();
    DynamicImage::new_rgb8(width, height)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    Bytes::from(buf)
}

/// Transport that records every fetch and holds it until released.
pub struct GatedTransport {
    body: Bytes,
    fail: bool,
    open: Mutex<bool>,
    opened: Condvar,
    calls: Mutex<Vec<String>>,
}

impl GatedTransport {
    fn build(body: Bytes, fail: bool, open: bool) -> Arc<Self> {
        Arc::new(Self {
            body,
            fail,
            open: Mutex::new(open),
            opened: Condvar::new(),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn open(body: Bytes) -> Arc<Self> {
        Self::build(body, false, true)
    }

    pub fn closed(body: Bytes) -> Arc<Self> {
        Self::build(body, false, false)
    }

    pub fn failing() -> Arc<Self> {
        Self::build(Bytes::new(), true, true)
    }

    pub fn release(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl Transport for GatedTransport {
    fn fetch(&self, uri: &str) -> LoadResult<Bytes> {
        self.calls.lock().push(uri.to_string());
        let mut open = self.open.lock();
        while !*open {
            if self
                .opened
                .wait_for(&mut open, Duration::from_secs(5))
                .timed_out()
            {
                break;
            }
        }
        drop(open);
        if self.fail {
            Err(LoadError::transport(uri, "HTTP 503 Service Unavailable"))
        } else {
            Ok(self.body.clone())
        }
    }
}

/// Real decoder that counts its calls.
#[derive(Default)]
pub struct CountingDecoder {
    inner: ImageCrateDecoder,
    pub decodes: AtomicUsize,
    pub probes: AtomicUsize,
}

impl CountingDecoder {
    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

impl ImageDecoderPort for CountingDecoder {
    fn decode(&self, bytes: &[u8], signature: &DecodeSignature) -> LoadResult<DecodedImage> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        self.inner.decode(bytes, signature)
    }

    fn probe_dimensions(&self, uri: &str, bytes: &[u8]) -> LoadResult<Dimensions> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.inner.probe_dimensions(uri, bytes)
    }
}

pub struct Harness {
    pub loader: ImageLoader,
    pub events: mpsc::UnboundedReceiver<ImageLoadedEvent>,
    pub transport: Arc<GatedTransport>,
    pub decoder: Arc<CountingDecoder>,
}

/// Starts a loader whose disk cache lives in `dir`.
pub fn harness_at(dir: &Path, transport: Arc<GatedTransport>, config: ImageLoaderConfig) -> Harness {
    let disk = DiskImageCache::open_in(dir, DISK_BUDGET).unwrap();
    let decoder = Arc::new(CountingDecoder::default());
    let (tx, events) = mpsc::unbounded_channel();
    let loader = ImageLoader::new(
        config,
        tx,
        Arc::new(disk),
        Arc::clone(&transport) as Arc<dyn Transport>,
        Arc::clone(&decoder) as Arc<dyn ImageDecoderPort>,
    )
    .unwrap();
    Harness {
        loader,
        events,
        transport,
        decoder,
    }
}

/// Config with a single network worker, so fetch order is observable.
pub fn serial_network() -> ImageLoaderConfig {
    ImageLoaderConfig {
        network_workers: 1,
        ..ImageLoaderConfig::default()
    }
}

pub async fn next_event(events: &mut mpsc::UnboundedReceiver<ImageLoadedEvent>) -> ImageLoadedEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Polls `condition` until it holds or a few seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..250 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
