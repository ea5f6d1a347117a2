//! Thread-safe blocking wrapper around [`AuxiliaryQueue`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use super::auxiliary_queue::AuxiliaryQueue;
use super::task::Prioritizable;
use crate::domain::entities::ConsumerId;

#[derive(Debug)]
struct QueueState {
    queue: AuxiliaryQueue,
    closed: bool,
    dequeued: u64,
}

/// Blocking multi-class queue shared by a worker pool and its producers.
#[derive(Debug)]
pub struct BlockingPriorityQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl BlockingPriorityQueue {
    /// Wraps `queue`.
    #[must_use]
    pub fn new(queue: AuxiliaryQueue) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue,
                closed: false,
                dequeued: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Creates a queue with the standard priority classes.
    #[must_use]
    pub fn with_standard_classes() -> Self {
        Self::new(AuxiliaryQueue::with_standard_classes())
    }

    /// Queues `item` in `class` and wakes one waiting worker.
    ///
    /// Returns items evicted to make room. After [`close`](Self::close) the
    /// item is cancelled and returned as evicted.
    pub fn offer(&self, item: Arc<Prioritizable>, class: usize) -> Vec<Arc<Prioritizable>> {
        let mut state = self.state.lock();
        if state.closed {
            debug!(task = %item.id(), "Queue closed, rejecting task");
            item.cancel();
            return vec![item];
        }
        let evicted = state.queue.add(item, class);
        drop(state);
        self.available.notify_one();
        evicted
    }

    /// Blocks until an item is available. Returns `None` once closed.
    pub fn take(&self) -> Option<Arc<Prioritizable>> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.queue.remove_highest_priority() {
                state.dequeued += 1;
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Like [`take`](Self::take) but gives up after `timeout`.
    pub fn poll(&self, timeout: Duration) -> Option<Arc<Prioritizable>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.queue.remove_highest_priority() {
                state.dequeued += 1;
                return Some(item);
            }
            if state.closed {
                return None;
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                let item = state.queue.remove_highest_priority();
                if item.is_some() {
                    state.dequeued += 1;
                }
                return item;
            }
        }
    }

    /// Moves a queued item to the head of its class.
    pub fn bump(&self, item: &Prioritizable) -> bool {
        self.state.lock().queue.bump(item)
    }

    /// Moves a queued item into `class`. Returns `None` if the item is no
    /// longer queued, otherwise the items evicted by the move.
    pub fn promote(&self, item: &Arc<Prioritizable>, class: usize) -> Option<Vec<Arc<Prioritizable>>> {
        let mut state = self.state.lock();
        if !state.queue.contains(item) {
            return None;
        }
        Some(state.queue.add(Arc::clone(item), class))
    }

    /// Removes a queued item.
    pub fn remove(&self, item: &Prioritizable) -> bool {
        self.state.lock().queue.remove(item)
    }

    /// Returns true if `item` is queued.
    #[must_use]
    pub fn contains(&self, item: &Prioritizable) -> bool {
        self.state.lock().queue.contains(item)
    }

    /// See [`AuxiliaryQueue::relocate_consumer`].
    pub fn relocate_consumer(
        &self,
        consumer: ConsumerId,
        from: usize,
        first: usize,
        second: usize,
    ) -> Vec<Arc<Prioritizable>> {
        self.state
            .lock()
            .queue
            .relocate_consumer(consumer, from, first, second)
    }

    /// See [`AuxiliaryQueue::demote_consumer`].
    pub fn demote_consumer(&self, consumer: ConsumerId, from: usize, to: usize) -> Vec<Arc<Prioritizable>> {
        self.state.lock().queue.demote_consumer(consumer, from, to)
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of items handed out, cancelled ones included.
    #[must_use]
    pub fn dequeued(&self) -> u64 {
        self.state.lock().dequeued
    }

    /// Returns true once [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Closes the queue, cancelling and returning everything still queued.
    /// Wakes all blocked workers.
    pub fn close(&self) -> Vec<Arc<Prioritizable>> {
        let mut state = self.state.lock();
        state.closed = true;
        let drained: Vec<_> = std::iter::from_fn(|| state.queue.remove_highest_priority()).collect();
        drop(state);
        for item in &drained {
            item.cancel();
        }
        self.available.notify_all();
        drained
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::application::scheduling::PriorityClass;
    use crate::application::scheduling::task::noop_task;

    #[test]
    fn test_take_returns_highest_priority() {
        let queue = BlockingPriorityQueue::with_standard_classes();
        queue.offer(noop_task("disk"), PriorityClass::DiskPrecache.index());
        queue.offer(noop_task("visible"), PriorityClass::Visible.index());

        assert_eq!(queue.take().map(|i| i.logical_key().to_string()).as_deref(), Some("visible"));
        assert_eq!(queue.dequeued(), 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_poll_times_out_when_empty() {
        let queue = BlockingPriorityQueue::with_standard_classes();
        assert!(queue.poll(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn test_take_wakes_on_offer() {
        let queue = Arc::new(BlockingPriorityQueue::with_standard_classes());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.take().map(|i| i.logical_key().to_string()))
        };
        thread::sleep(Duration::from_millis(20));
        queue.offer(noop_task("late"), 0);
        assert_eq!(consumer.join().ok().flatten().as_deref(), Some("late"));
    }

    #[test]
    fn test_close_releases_waiters_and_cancels_backlog() {
        let queue = Arc::new(BlockingPriorityQueue::with_standard_classes());
        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.take().is_none())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(queue.close().is_empty());
        assert!(waiter.join().unwrap_or(false));

        let rejected = noop_task("after-close");
        let returned = queue.offer(Arc::clone(&rejected), 0);
        assert_eq!(returned.len(), 1);
        assert!(rejected.is_cancelled());
    }

    #[test]
    fn test_promote_only_queued_items() {
        let queue = BlockingPriorityQueue::with_standard_classes();
        let item = noop_task("a");
        assert!(queue.promote(&item, 0).is_none());
        queue.offer(Arc::clone(&item), PriorityClass::DiskPrecache.index());
        assert_eq!(queue.promote(&item, 0).map(|evicted| evicted.len()), Some(0));
        assert_eq!(item.class(), 0);
        assert!(queue.remove(&item));
        assert!(!queue.contains(&item));
    }
}
