//! Bounded pool of named worker threads.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error, trace};

use super::blocking_queue::BlockingPriorityQueue;
use super::queuing_map::QueuingMap;
use super::task::Prioritizable;
use crate::domain::entities::ConsumerId;

#[derive(Debug, Default)]
struct PoolCounters {
    executed: AtomicU64,
    skipped: AtomicU64,
    panicked: AtomicU64,
}

/// Snapshot of a pool's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Worker threads started.
    pub workers: usize,
    /// Items waiting in the queue.
    pub queued: usize,
    /// Items that ran.
    pub executed: u64,
    /// Items dequeued but skipped because they were cancelled or redundant.
    pub skipped: u64,
    /// Items whose work panicked.
    pub panicked: u64,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} workers, {} queued, {} executed, {} skipped",
            self.workers, self.queued, self.executed, self.skipped
        )
    }
}

/// Fixed number of threads draining one [`BlockingPriorityQueue`].
///
/// Items pass through a [`QueuingMap`] so that at most one item per logical
/// key runs at a time.
#[derive(Debug)]
pub struct WorkerPool {
    name: String,
    size: usize,
    queue: Arc<BlockingPriorityQueue>,
    gate: Arc<QueuingMap>,
    counters: Arc<PoolCounters>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Starts `size` workers (at least one) named `{name}-{n}`.
    ///
    /// # Errors
    /// Returns an error if a thread cannot be spawned.
    pub fn start(name: &str, size: usize) -> io::Result<Self> {
        let size = size.max(1);
        let queue = Arc::new(BlockingPriorityQueue::with_standard_classes());
        let gate = Arc::new(QueuingMap::new());
        let counters = Arc::new(PoolCounters::default());

        let mut workers = Vec::with_capacity(size);
        for n in 0..size {
            let queue = Arc::clone(&queue);
            let gate = Arc::clone(&gate);
            let counters = Arc::clone(&counters);
            let handle = thread::Builder::new()
                .name(format!("{name}-{n}"))
                .spawn(move || run_worker(&queue, &gate, &counters))?;
            workers.push(handle);
        }
        debug!(pool = name, workers = size, "Worker pool started");

        Ok(Self {
            name: name.to_string(),
            size,
            queue,
            gate,
            counters,
            workers: Mutex::new(workers),
        })
    }

    /// Queues `item` in `class`.
    ///
    /// Returns items that will never run: evicted to make room, or `item`
    /// itself when the pool is shut down. An item whose key is already
    /// executing is cancelled but not returned, since the running item does
    /// its job.
    pub fn submit(&self, item: Arc<Prioritizable>, class: usize) -> Vec<Arc<Prioritizable>> {
        if !self.gate.put(&item) {
            trace!(pool = %self.name, key = item.logical_key(), "Already executing");
            return Vec::new();
        }
        let evicted = self.queue.offer(item, class);
        for gone in &evicted {
            self.gate.discard(gone);
        }
        evicted
    }

    /// Moves a queued item to the head of its class.
    pub fn bump(&self, item: &Prioritizable) -> bool {
        self.queue.bump(item)
    }

    /// Moves a queued item into a higher class. See
    /// [`BlockingPriorityQueue::promote`].
    pub fn promote(&self, item: &Arc<Prioritizable>, class: usize) -> Option<Vec<Arc<Prioritizable>>> {
        let evicted = self.queue.promote(item, class)?;
        for gone in &evicted {
            self.gate.discard(gone);
        }
        Some(evicted)
    }

    /// See [`BlockingPriorityQueue::relocate_consumer`].
    pub fn relocate_consumer(
        &self,
        consumer: ConsumerId,
        from: usize,
        first: usize,
        second: usize,
    ) -> Vec<Arc<Prioritizable>> {
        let evicted = self.queue.relocate_consumer(consumer, from, first, second);
        for gone in &evicted {
            self.gate.discard(gone);
        }
        evicted
    }

    /// See [`BlockingPriorityQueue::demote_consumer`].
    pub fn demote_consumer(&self, consumer: ConsumerId, from: usize, to: usize) -> Vec<Arc<Prioritizable>> {
        let evicted = self.queue.demote_consumer(consumer, from, to);
        for gone in &evicted {
            self.gate.discard(gone);
        }
        evicted
    }

    /// Returns the pool's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.size,
            queued: self.queue.len(),
            executed: self.counters.executed.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
        }
    }

    /// Closes the queue and joins the workers. Items still queued are
    /// cancelled and returned. Safe to call more than once.
    pub fn shutdown(&self) -> Vec<Arc<Prioritizable>> {
        let backlog = self.queue.close();
        for item in &backlog {
            self.gate.discard(item);
        }
        let current = thread::current().id();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!(pool = %self.name, "Worker thread panicked");
            }
        }
        if !backlog.is_empty() {
            debug!(pool = %self.name, cancelled = backlog.len(), "Worker pool stopped");
        }
        backlog
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(queue: &BlockingPriorityQueue, gate: &QueuingMap, counters: &PoolCounters) {
    while let Some(item) = queue.take() {
        let Some(work) = item.begin() else {
            gate.discard(&item);
            counters.skipped.fetch_add(1, Ordering::Relaxed);
            continue;
        };
        if !gate.notify_executing(&item) {
            item.finish();
            counters.skipped.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        let key = item.logical_key();
        match panic::catch_unwind(AssertUnwindSafe(work)) {
            Ok(completion) => {
                gate.on_complete(key);
                if panic::catch_unwind(AssertUnwindSafe(completion)).is_err() {
                    error!(key, "Task completion panicked");
                    counters.panicked.fetch_add(1, Ordering::Relaxed);
                }
                counters.executed.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                error!(key, "Task panicked");
                gate.on_complete(key);
                counters.panicked.fetch_add(1, Ordering::Relaxed);
            }
        }
        item.finish();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::application::scheduling::PriorityClass;
    use crate::application::scheduling::task::no_completion;

    fn recording_task(key: &str, log: &mpsc::Sender<String>) -> Arc<Prioritizable> {
        let log = log.clone();
        let name = key.to_string();
        Prioritizable::new(key, None, move || {
            let _ = log.send(name);
            no_completion()
        })
    }

    fn blocking_task(key: &str, release: mpsc::Receiver<()>, started: mpsc::Sender<()>) -> Arc<Prioritizable> {
        Prioritizable::new(key, None, move || {
            let _ = started.send(());
            let _ = release.recv_timeout(Duration::from_secs(5));
            no_completion()
        })
    }

    #[test]
    fn test_runs_in_priority_order_behind_busy_worker() {
        let pool = WorkerPool::start("test-order", 1).expect("pool");
        let (release_tx, release_rx) = mpsc::channel();
        let (started_tx, started_rx) = mpsc::channel();
        let (log_tx, log_rx) = mpsc::channel();

        pool.submit(blocking_task("blocker", release_rx, started_tx), 0);
        started_rx.recv_timeout(Duration::from_secs(5)).expect("blocker started");

        pool.submit(recording_task("disk", &log_tx), PriorityClass::DiskPrecache.index());
        pool.submit(recording_task("first-visible", &log_tx), 0);
        pool.submit(recording_task("second-visible", &log_tx), 0);
        release_tx.send(()).expect("release");

        let order: Vec<_> = (0..3)
            .map(|_| log_rx.recv_timeout(Duration::from_secs(5)).expect("ran"))
            .collect();
        assert_eq!(order, vec!["second-visible", "first-visible", "disk"]);
        pool.shutdown();
        assert_eq!(pool.stats().executed, 4);
    }

    #[test]
    fn test_cancelled_item_is_skipped() {
        let pool = WorkerPool::start("test-cancel", 1).expect("pool");
        let (release_tx, release_rx) = mpsc::channel();
        let (started_tx, started_rx) = mpsc::channel();
        let (log_tx, log_rx) = mpsc::channel();

        pool.submit(blocking_task("blocker", release_rx, started_tx), 0);
        started_rx.recv_timeout(Duration::from_secs(5)).expect("blocker started");
        let doomed = recording_task("doomed", &log_tx);
        pool.submit(Arc::clone(&doomed), 0);
        pool.submit(recording_task("kept", &log_tx), 1);
        assert!(doomed.cancel());
        release_tx.send(()).expect("release");

        assert_eq!(
            log_rx.recv_timeout(Duration::from_secs(5)).ok().as_deref(),
            Some("kept")
        );
        pool.shutdown();
        assert!(log_rx.try_recv().is_err());
        let stats = pool.stats();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.executed, 2);
    }

    #[test]
    fn test_duplicate_key_runs_once() {
        let pool = WorkerPool::start("test-dedup", 1).expect("pool");
        let (release_tx, release_rx) = mpsc::channel();
        let (started_tx, started_rx) = mpsc::channel();
        let (log_tx, log_rx) = mpsc::channel();

        pool.submit(blocking_task("blocker", release_rx, started_tx), 0);
        started_rx.recv_timeout(Duration::from_secs(5)).expect("blocker started");
        pool.submit(recording_task("same", &log_tx), 0);
        pool.submit(recording_task("same", &log_tx), 0);
        release_tx.send(()).expect("release");

        assert!(log_rx.recv_timeout(Duration::from_secs(5)).is_ok());
        pool.shutdown();
        assert!(log_rx.try_recv().is_err());
    }

    #[test]
    fn test_shutdown_cancels_backlog() {
        let pool = WorkerPool::start("test-shutdown", 1).expect("pool");
        let (release_tx, release_rx) = mpsc::channel();
        let (started_tx, started_rx) = mpsc::channel();
        let (log_tx, _log_rx) = mpsc::channel();

        pool.submit(blocking_task("blocker", release_rx, started_tx), 0);
        started_rx.recv_timeout(Duration::from_secs(5)).expect("blocker started");
        let queued = recording_task("queued", &log_tx);
        pool.submit(Arc::clone(&queued), 0);
        release_tx.send(()).expect("release");
        let backlog = pool.shutdown();

        assert!(backlog.len() <= 1);
        if backlog.is_empty() {
            assert!(!queued.is_cancelled());
        } else {
            assert!(queued.is_cancelled());
        }
        let rejected = pool.submit(recording_task("late", &log_tx), 0);
        assert_eq!(rejected.len(), 1);
    }
}
