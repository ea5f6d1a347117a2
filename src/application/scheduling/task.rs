//! Schedulable unit of work.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::domain::entities::CacheKey;

/// Global counter for generating unique task IDs.
static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Deferred second half of a task, run after the task's logical key has been
/// released. Used to fan results out to waiting listeners.
pub type Completion = Box<dyn FnOnce() + Send>;

type Work = Box<dyn FnOnce() -> Completion + Send>;

/// Returns a completion that does nothing.
#[must_use]
pub fn no_completion() -> Completion {
    Box::new(|| {})
}

/// Unique identifier of a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        Self(TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Lifecycle of a task. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Waiting in a queue.
    Queued = 0,
    /// Taken by a worker and executing.
    Running = 1,
    /// Dropped before it started; will never run.
    Cancelled = 2,
    /// Ran to completion.
    Finished = 3,
}

impl TaskState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Queued,
            1 => Self::Running,
            2 => Self::Cancelled,
            _ => Self::Finished,
        }
    }
}

/// A unit of work waiting for a worker.
///
/// Consumed exactly once: either run by a worker or skipped because it was
/// cancelled. Never reused.
pub struct Prioritizable {
    id: TaskId,
    logical_key: String,
    placement: Option<CacheKey>,
    class: AtomicUsize,
    state: AtomicU8,
    work: Mutex<Option<Work>>,
}

impl Prioritizable {
    /// Creates a queued task.
    ///
    /// `logical_key` groups tasks doing the same thing; at most one task per
    /// key executes at a time. `work` runs on a worker thread and returns the
    /// completion to run once the key is released.
    pub fn new<F>(logical_key: impl Into<String>, placement: Option<CacheKey>, work: F) -> Arc<Self>
    where
        F: FnOnce() -> Completion + Send + 'static,
    {
        Arc::new(Self {
            id: TaskId::next(),
            logical_key: logical_key.into(),
            placement,
            class: AtomicUsize::new(0),
            state: AtomicU8::new(TaskState::Queued as u8),
            work: Mutex::new(Some(Box::new(work))),
        })
    }

    /// Returns the task id.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the logical request key.
    #[must_use]
    pub fn logical_key(&self) -> &str {
        &self.logical_key
    }

    /// Returns the consumer placement, if any.
    #[must_use]
    pub const fn placement(&self) -> Option<CacheKey> {
        self.placement
    }

    /// Returns the index of the priority class the task was last queued in.
    #[must_use]
    pub fn class(&self) -> usize {
        self.class.load(Ordering::Acquire)
    }

    pub(crate) fn set_class(&self, class: usize) {
        self.class.store(class, Ordering::Release);
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns true while the task waits in a queue.
    #[must_use]
    pub fn is_queued(&self) -> bool {
        self.state() == TaskState::Queued
    }

    /// Returns true if the task was cancelled before it ran.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state() == TaskState::Cancelled
    }

    /// Cancels the task if it has not started. Returns true if this call
    /// cancelled it.
    pub fn cancel(&self) -> bool {
        let cancelled = self.transition(TaskState::Queued, TaskState::Cancelled);
        if cancelled {
            self.work.lock().take();
        }
        cancelled
    }

    /// Claims the task for execution, returning its work.
    pub(crate) fn begin(&self) -> Option<Box<dyn FnOnce() -> Completion + Send>> {
        if self.transition(TaskState::Queued, TaskState::Running) {
            self.work.lock().take()
        } else {
            None
        }
    }

    pub(crate) fn finish(&self) {
        self.transition(TaskState::Running, TaskState::Finished);
    }

    fn transition(&self, from: TaskState, to: TaskState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl fmt::Debug for Prioritizable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prioritizable")
            .field("id", &self.id)
            .field("logical_key", &self.logical_key)
            .field("class", &self.class())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) fn noop_task(key: &str) -> Arc<Prioritizable> {
    Prioritizable::new(key, None, no_completion)
}

#[cfg(test)]
pub(crate) fn placed_task(key: &str, placement: CacheKey) -> Arc<Prioritizable> {
    Prioritizable::new(key, Some(placement), no_completion)
}
