//! Stack and queue accessors.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::accessor::PriorityAccessor;
use super::task::{Prioritizable, TaskId};

/// Items ordered by a sequence number that can grow at either end.
#[derive(Debug, Default)]
struct SequencedSlots {
    order: BTreeMap<i64, Arc<Prioritizable>>,
    index: HashMap<TaskId, i64>,
    front: i64,
    back: i64,
}

impl SequencedSlots {
    fn push_back(&mut self, item: Arc<Prioritizable>) {
        self.remove(item.id());
        let seq = self.back;
        self.back += 1;
        self.index.insert(item.id(), seq);
        self.order.insert(seq, item);
    }

    fn push_front(&mut self, item: Arc<Prioritizable>) {
        self.remove(item.id());
        self.front -= 1;
        let seq = self.front;
        self.index.insert(item.id(), seq);
        self.order.insert(seq, item);
    }

    fn remove(&mut self, id: TaskId) -> Option<Arc<Prioritizable>> {
        let seq = self.index.remove(&id)?;
        self.order.remove(&seq)
    }

    fn first(&self) -> Option<Arc<Prioritizable>> {
        self.order.first_key_value().map(|(_, item)| Arc::clone(item))
    }

    fn last(&self) -> Option<Arc<Prioritizable>> {
        self.order.last_key_value().map(|(_, item)| Arc::clone(item))
    }

    fn pop_first(&mut self) -> Option<Arc<Prioritizable>> {
        let (_, item) = self.order.pop_first()?;
        self.index.remove(&item.id());
        Some(item)
    }

    fn pop_last(&mut self) -> Option<Arc<Prioritizable>> {
        let (_, item) = self.order.pop_last()?;
        self.index.remove(&item.id());
        Some(item)
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn contains(&self, id: TaskId) -> bool {
        self.index.contains_key(&id)
    }
}

/// Newest item first.
#[derive(Debug, Default)]
pub struct StackAccessor {
    slots: SequencedSlots,
}

impl StackAccessor {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PriorityAccessor for StackAccessor {
    fn attach(&mut self, item: Arc<Prioritizable>) -> Vec<Arc<Prioritizable>> {
        self.slots.push_back(item);
        Vec::new()
    }

    fn detach(&mut self, item: &Prioritizable) -> bool {
        self.slots.remove(item.id()).is_some()
    }

    fn peek(&self) -> Option<Arc<Prioritizable>> {
        self.slots.last()
    }

    fn pop(&mut self) -> Option<Arc<Prioritizable>> {
        self.slots.pop_last()
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn contains(&self, item: &Prioritizable) -> bool {
        self.slots.contains(item.id())
    }

    fn move_to_front(&mut self, item: &Prioritizable) -> bool {
        match self.slots.remove(item.id()) {
            Some(held) => {
                self.slots.push_back(held);
                true
            }
            None => false,
        }
    }
}

/// Oldest item first.
#[derive(Debug, Default)]
pub struct QueueAccessor {
    slots: SequencedSlots,
}

impl QueueAccessor {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PriorityAccessor for QueueAccessor {
    fn attach(&mut self, item: Arc<Prioritizable>) -> Vec<Arc<Prioritizable>> {
        self.slots.push_back(item);
        Vec::new()
    }

    fn detach(&mut self, item: &Prioritizable) -> bool {
        self.slots.remove(item.id()).is_some()
    }

    fn peek(&self) -> Option<Arc<Prioritizable>> {
        self.slots.first()
    }

    fn pop(&mut self) -> Option<Arc<Prioritizable>> {
        self.slots.pop_first()
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn contains(&self, item: &Prioritizable) -> bool {
        self.slots.contains(item.id())
    }

    fn move_to_front(&mut self, item: &Prioritizable) -> bool {
        match self.slots.remove(item.id()) {
            Some(held) => {
                self.slots.push_front(held);
                true
            }
            None => false,
        }
    }
}
