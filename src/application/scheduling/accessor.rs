//! Ordering policies inside one priority class.

use std::sync::Arc;

use super::consumer_range::ConsumerRangeAccessor;
use super::task::Prioritizable;

/// Ordering policy of one priority class.
///
/// Accessors never run work. Items they push out of a bounded window are
/// cancelled and returned from [`attach`](Self::attach) so the owner can
/// notify whoever was waiting on them.
pub trait PriorityAccessor: Send {
    /// Adds an item, replacing any previous entry for the same task.
    /// Returns items evicted to make room.
    fn attach(&mut self, item: Arc<Prioritizable>) -> Vec<Arc<Prioritizable>>;

    /// Removes an item. Returns true if it was present.
    fn detach(&mut self, item: &Prioritizable) -> bool;

    /// Returns the item [`pop`](Self::pop) would return.
    fn peek(&self) -> Option<Arc<Prioritizable>>;

    /// Removes and returns the head item.
    fn pop(&mut self) -> Option<Arc<Prioritizable>>;

    /// Number of items held.
    fn len(&self) -> usize;

    /// Returns true if no items are held.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if the item is held.
    fn contains(&self, item: &Prioritizable) -> bool;

    /// Moves a held item to the head. Bumping the head is a no-op.
    fn move_to_front(&mut self, item: &Prioritizable) -> bool;

    /// Downcast hook for consumer-aware accessors.
    fn as_consumer_range(&mut self) -> Option<&mut ConsumerRangeAccessor> {
        None
    }
}
