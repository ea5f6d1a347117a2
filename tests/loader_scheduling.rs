//! Ordering, cancellation and shutdown behavior of the loader's pools.
//!
//! Every test runs a single network worker and parks it on a gated fetch,
//! so the order in which queued downloads start is observable.
//!
//! Run with: `cargo test --test loader_scheduling`

mod common;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use common::{GatedTransport, Harness, eventually, harness_at, next_event, png, serial_network};
use pixcache::{
    CacheKey, ConsumerId, LoadError, LookAhead, Priority, ResourceRequest,
};

const BLOCKER: &str = "https://images.example.com/blocker.png";

fn uri(name: &str) -> String {
    format!("https://images.example.com/{name}.png")
}

/// Starts a loader whose only network worker is parked on `BLOCKER`.
async fn parked(dir: &TempDir) -> Harness {
    let h = harness_at(dir.path(), GatedTransport::closed(png(8, 8)), serial_network());
    h.loader.request(ResourceRequest::new(BLOCKER)).unwrap();
    assert!(eventually(|| h.transport.call_count() == 1).await);
    h
}

async fn fetch_order(h: &Harness, expected: usize) -> Vec<String> {
    h.transport.release();
    assert!(eventually(|| h.transport.call_count() == expected).await);
    h.transport.calls()
}

#[tokio::test]
async fn test_cancel_while_queued_never_runs() {
    let dir = TempDir::new().unwrap();
    let mut h = parked(&dir).await;

    let queued = h
        .loader
        .request(ResourceRequest::new(uri("queued")))
        .unwrap()
        .handle()
        .unwrap();
    assert_eq!(h.loader.stats().pending.network, 2);

    assert!(h.loader.cancel(queued));
    assert_eq!(h.loader.stats().pending.network, 1);
    assert!(!h.loader.cancel(queued));

    h.transport.release();
    let event = next_event(&mut h.events).await;
    assert_ne!(event.handle, queued);
    assert!(eventually(|| h.loader.stats().network.skipped == 1).await);

    assert_eq!(h.transport.calls(), vec![BLOCKER.to_string()]);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn test_visible_work_runs_before_precache() {
    let dir = TempDir::new().unwrap();
    let h = parked(&dir).await;

    h.loader.precache_to_disk(&uri("p1")).unwrap();
    h.loader.precache_to_disk(&uri("p2")).unwrap();
    h.loader.request(ResourceRequest::new(uri("visible"))).unwrap();

    assert_eq!(
        fetch_order(&h, 4).await,
        vec![BLOCKER.to_string(), uri("visible"), uri("p1"), uri("p2")]
    );
}

#[tokio::test]
async fn test_visible_request_promotes_joined_precache() {
    let dir = TempDir::new().unwrap();
    let h = parked(&dir).await;

    h.loader.precache_to_disk(&uri("p1")).unwrap();
    h.loader.precache_to_disk(&uri("p2")).unwrap();
    h.loader.request(ResourceRequest::new(uri("p2"))).unwrap();
    assert_eq!(h.loader.stats().pending.network, 3);

    assert_eq!(
        fetch_order(&h, 3).await,
        vec![BLOCKER.to_string(), uri("p2"), uri("p1")]
    );
}

#[tokio::test]
async fn test_newest_visible_request_runs_first() {
    let dir = TempDir::new().unwrap();
    let h = parked(&dir).await;

    for name in ["v1", "v2", "v3"] {
        h.loader.request(ResourceRequest::new(uri(name))).unwrap();
    }

    assert_eq!(
        fetch_order(&h, 4).await,
        vec![BLOCKER.to_string(), uri("v3"), uri("v2"), uri("v1")]
    );
}

fn placed(name: &str, consumer: u64) -> ResourceRequest {
    ResourceRequest::new(uri(name))
        .with_priority(Priority::MemoryPrecache)
        .with_placement(CacheKey::new(
            ConsumerId(consumer),
            0,
            LookAhead::new(4, 8),
        ))
}

#[tokio::test]
async fn test_deprioritized_consumer_yields_to_other_precache() {
    let dir = TempDir::new().unwrap();
    let h = parked(&dir).await;

    h.loader.request(placed("ranged", 1)).unwrap();
    h.loader.deprioritize_consumer(ConsumerId(1));
    h.loader
        .request(ResourceRequest::new(uri("plain")).with_priority(Priority::MemoryPrecache))
        .unwrap();

    assert_eq!(
        fetch_order(&h, 3).await,
        vec![BLOCKER.to_string(), uri("plain"), uri("ranged")]
    );
}

#[tokio::test]
async fn test_prioritized_consumer_regains_its_range() {
    let dir = TempDir::new().unwrap();
    let h = parked(&dir).await;

    h.loader.request(placed("ranged", 1)).unwrap();
    h.loader.deprioritize_consumer(ConsumerId(1));
    h.loader
        .request(ResourceRequest::new(uri("plain")).with_priority(Priority::MemoryPrecache))
        .unwrap();
    h.loader.prioritize_consumer(ConsumerId(1));

    assert_eq!(
        fetch_order(&h, 3).await,
        vec![BLOCKER.to_string(), uri("ranged"), uri("plain")]
    );
}

fn in_window(name: &str, position: usize) -> ResourceRequest {
    ResourceRequest::new(uri(name))
        .with_priority(Priority::DiskPrecache)
        .with_placement(CacheKey::new(ConsumerId(7), position, LookAhead::new(0, 2)))
}

#[tokio::test]
async fn test_window_overflow_evicts_position_that_fell_off() {
    let dir = TempDir::new().unwrap();
    let mut h = parked(&dir).await;

    let first = h
        .loader
        .request(in_window("w0", 0))
        .unwrap()
        .handle()
        .unwrap();
    h.loader.request(in_window("w1", 1)).unwrap();
    assert_eq!(h.loader.stats().pending.listeners, 3);

    h.loader.request(in_window("w2", 2)).unwrap();
    let event = next_event(&mut h.events).await;
    assert_eq!(event.handle, first);
    assert!(matches!(event.result, Err(LoadError::Evicted { .. })));
    assert_eq!(h.loader.stats().pending.listeners, 3);
    assert_eq!(h.loader.stats().pending.network, 3);

    assert_eq!(
        fetch_order(&h, 3).await,
        vec![BLOCKER.to_string(), uri("w1"), uri("w2")]
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.transport.call_count(), 3);
}

#[tokio::test]
async fn test_disk_budget_change_evicts_files() {
    let dir = TempDir::new().unwrap();
    let mut h = harness_at(dir.path(), GatedTransport::open(png(8, 8)), serial_network());

    for name in ["a", "b"] {
        h.loader.request(ResourceRequest::new(uri(name))).unwrap();
        next_event(&mut h.events).await.result.unwrap();
    }
    assert_eq!(h.loader.disk_cache().stats().on_disk, 2);

    h.loader.set_disk_budget(0);
    assert!(eventually(|| h.loader.disk_cache().is_empty()).await);
    assert_eq!(h.loader.disk_cache().budget(), 0);
}

#[tokio::test]
async fn test_shutdown_fails_queued_work() {
    let dir = TempDir::new().unwrap();
    let mut h = parked(&dir).await;
    let queued = h
        .loader
        .request(ResourceRequest::new(uri("queued")))
        .unwrap()
        .handle()
        .unwrap();

    let transport = Arc::clone(&h.transport);
    let releaser = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        transport.release();
    });
    h.loader.shutdown();
    releaser.join().unwrap();

    let mut queued_result = None;
    for _ in 0..2 {
        let event = next_event(&mut h.events).await;
        if event.handle == queued {
            queued_result = Some(event.result);
        }
    }
    assert!(matches!(queued_result, Some(Err(LoadError::Evicted { .. }))));
    assert!(matches!(
        h.loader.request(ResourceRequest::new(uri("late"))),
        Err(LoadError::InvalidRequest { .. })
    ));
    assert_eq!(h.transport.calls(), vec![BLOCKER.to_string()]);
}
