//! Per-key execution gate.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::task::{Prioritizable, TaskId};

#[derive(Debug, Default)]
struct GateState {
    executing: HashSet<String>,
    waiting: HashMap<String, Vec<Arc<Prioritizable>>>,
}

/// Ensures at most one task per logical key executes at a time.
///
/// A task submitted while its key executes is cancelled immediately. When a
/// task starts, every other task waiting on the same key is cancelled.
#[derive(Debug, Default)]
pub struct QueuingMap {
    state: Mutex<GateState>,
}

impl QueuingMap {
    /// Creates an empty gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task about to be queued. Returns false, cancelling the
    /// task, if its key is executing.
    pub fn put(&self, item: &Arc<Prioritizable>) -> bool {
        let mut state = self.state.lock();
        if state.executing.contains(item.logical_key()) {
            drop(state);
            item.cancel();
            trace!(key = item.logical_key(), "Key executing, task cancelled");
            return false;
        }
        state
            .waiting
            .entry(item.logical_key().to_string())
            .or_default()
            .push(Arc::clone(item));
        true
    }

    /// Marks the task's key as executing. Returns false, cancelling the task,
    /// if another task of the same key already runs.
    pub fn notify_executing(&self, item: &Arc<Prioritizable>) -> bool {
        let key = item.logical_key();
        let mut state = self.state.lock();
        if state.executing.contains(key) {
            if let Some(waiters) = state.waiting.get_mut(key) {
                waiters.retain(|waiter| waiter.id() != item.id());
            }
            drop(state);
            item.cancel();
            return false;
        }
        let others = Self::take_waiting_except(&mut state, key, item.id());
        state.executing.insert(key.to_string());
        drop(state);
        for other in others {
            if other.cancel() {
                trace!(key, task = %other.id(), "Duplicate task cancelled");
            }
        }
        true
    }

    /// Releases the key after its task finished.
    pub fn on_complete(&self, key: &str) {
        self.state.lock().executing.remove(key);
    }

    /// Forgets a task that will not run.
    pub fn discard(&self, item: &Prioritizable) {
        let mut state = self.state.lock();
        if let Some(waiters) = state.waiting.get_mut(item.logical_key()) {
            waiters.retain(|waiter| waiter.id() != item.id());
            if waiters.is_empty() {
                state.waiting.remove(item.logical_key());
            }
        }
    }

    /// Returns true while a task of `key` executes.
    #[must_use]
    pub fn is_executing(&self, key: &str) -> bool {
        self.state.lock().executing.contains(key)
    }

    /// Number of tasks waiting on `key`.
    #[must_use]
    pub fn waiting(&self, key: &str) -> usize {
        self.state.lock().waiting.get(key).map_or(0, Vec::len)
    }

    fn take_waiting_except(state: &mut GateState, key: &str, id: TaskId) -> Vec<Arc<Prioritizable>> {
        state
            .waiting
            .remove(key)
            .unwrap_or_default()
            .into_iter()
            .filter(|waiter| waiter.id() != id)
            .collect()
    }
}
