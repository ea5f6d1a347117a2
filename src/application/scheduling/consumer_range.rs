//! Look-ahead windows keyed by consumer position.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::trace;

use super::accessor::PriorityAccessor;
use super::sequenced::QueueAccessor;
use super::task::{Prioritizable, TaskId};
use crate::domain::entities::{ConsumerId, LookAhead};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// Fixed-size window of position slots for one consumer.
///
/// Slot `i` holds the item requested for position `base + i`. Requesting a
/// position outside the window slides it, evicting whatever falls off the
/// other end.
#[derive(Debug)]
struct SlotArena {
    look_ahead: LookAhead,
    base: usize,
    slots: VecDeque<Option<Arc<Prioritizable>>>,
    occupied: usize,
    direction: Direction,
    last_position: Option<usize>,
}

impl SlotArena {
    fn new(look_ahead: LookAhead) -> Self {
        Self {
            look_ahead,
            base: 0,
            slots: std::iter::repeat_with(|| None)
                .take(look_ahead.window())
                .collect(),
            occupied: 0,
            direction: Direction::Forward,
            last_position: None,
        }
    }

    fn resize(&mut self, look_ahead: LookAhead) -> Vec<Arc<Prioritizable>> {
        self.look_ahead = look_ahead;
        let window = look_ahead.window();
        let mut evicted = Vec::new();
        while self.slots.len() > window {
            let dropped = match self.direction {
                Direction::Forward => self.slots.pop_back(),
                Direction::Backward => {
                    self.base += 1;
                    self.slots.pop_front()
                }
            };
            if let Some(Some(item)) = dropped {
                evicted.push(item);
            }
        }
        while self.slots.len() < window {
            self.slots.push_back(None);
        }
        self.occupied -= evicted.len();
        evicted
    }

    fn place(&mut self, position: usize, item: Arc<Prioritizable>) -> Vec<Arc<Prioritizable>> {
        let window = self.slots.len();
        let mut evicted = Vec::new();

        if self.occupied == 0 {
            self.base = position;
        } else if position < self.base {
            let shift = self.base - position;
            for _ in 0..shift.min(window) {
                if let Some(Some(old)) = self.slots.pop_back() {
                    evicted.push(old);
                }
                self.slots.push_front(None);
            }
            self.base = position;
        } else if position >= self.base + window {
            let shift = position - (self.base + window) + 1;
            for _ in 0..shift.min(window) {
                if let Some(Some(old)) = self.slots.pop_front() {
                    evicted.push(old);
                }
                self.slots.push_back(None);
            }
            self.base += shift;
        }
        self.occupied -= evicted.len();

        if let Some(last) = self.last_position {
            if position > last {
                self.direction = Direction::Forward;
            } else if position < last {
                self.direction = Direction::Backward;
            }
        }
        self.last_position = Some(position);

        let index = position - self.base;
        match self.slots[index].replace(item) {
            Some(old) => evicted.push(old),
            None => self.occupied += 1,
        }
        evicted
    }

    /// Slot index at `distance` from the end nearest the viewport.
    fn slot_at(&self, distance: usize) -> usize {
        match self.direction {
            Direction::Forward => distance,
            Direction::Backward => self.slots.len() - 1 - distance,
        }
    }

    fn head_index(&self) -> Option<usize> {
        (0..self.slots.len())
            .map(|distance| self.slot_at(distance))
            .find(|&index| self.slots[index].is_some())
    }

    fn head(&self) -> Option<&Arc<Prioritizable>> {
        self.head_index().and_then(|index| self.slots[index].as_ref())
    }

    fn find(&self, id: TaskId) -> Option<&Arc<Prioritizable>> {
        self.slots.iter().flatten().find(|item| item.id() == id)
    }

    fn take(&mut self, index: usize) -> Option<Arc<Prioritizable>> {
        let item = self.slots[index].take()?;
        self.occupied -= 1;
        Some(item)
    }

    fn remove(&mut self, id: TaskId) -> Option<Arc<Prioritizable>> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|item| item.id() == id))?;
        self.take(index)
    }

    fn drain_near_first(&mut self) -> Vec<(usize, Arc<Prioritizable>)> {
        let mut drained = Vec::with_capacity(self.occupied);
        for distance in 0..self.slots.len() {
            let index = self.slot_at(distance);
            if let Some(item) = self.slots[index].take() {
                drained.push((distance, item));
            }
        }
        self.occupied = 0;
        drained
    }
}

/// Where the items of a relocated consumer ended up.
#[derive(Debug, Default)]
pub struct SwapOutcome {
    /// Items moved into the first accessor.
    pub to_first: Vec<Arc<Prioritizable>>,
    /// Items moved into the second accessor.
    pub to_second: Vec<Arc<Prioritizable>>,
    /// Items the receiving accessors evicted while accepting the move.
    pub evicted: Vec<Arc<Prioritizable>>,
}

/// Consumer-aware accessor.
///
/// Each consumer owns a window of `look_ahead.window()` position slots. The
/// most recently active consumer is served first, nearest position first.
/// Items without a placement fall back to FIFO order after all consumers.
#[derive(Debug, Default)]
pub struct ConsumerRangeAccessor {
    arenas: HashMap<ConsumerId, SlotArena>,
    recency: VecDeque<ConsumerId>,
    index: HashMap<TaskId, ConsumerId>,
    bumped: VecDeque<TaskId>,
    unplaced: QueueAccessor,
    placed: usize,
}

impl ConsumerRangeAccessor {
    /// Creates an empty accessor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items held for `consumer`.
    #[must_use]
    pub fn consumer_len(&self, consumer: ConsumerId) -> usize {
        self.arenas.get(&consumer).map_or(0, |arena| arena.occupied)
    }

    /// Removes every item of `consumer`, nearest position first.
    pub fn drain_consumer(&mut self, consumer: ConsumerId) -> Vec<Arc<Prioritizable>> {
        let Some(mut arena) = self.arenas.remove(&consumer) else {
            return Vec::new();
        };
        self.recency.retain(|c| *c != consumer);
        arena
            .drain_near_first()
            .into_iter()
            .map(|(_, item)| {
                self.forget(item.id());
                item
            })
            .collect()
    }

    /// Moves every item of `consumer` out of this accessor. Items within the
    /// consumer's memory look-ahead go to `first`, the rest to `second`.
    pub fn swap(
        &mut self,
        consumer: ConsumerId,
        first: &mut dyn PriorityAccessor,
        second: &mut dyn PriorityAccessor,
    ) -> SwapOutcome {
        let mut outcome = SwapOutcome::default();
        let Some(mut arena) = self.arenas.remove(&consumer) else {
            return outcome;
        };
        self.recency.retain(|c| *c != consumer);
        let boundary = arena.look_ahead.memory;
        for (distance, item) in arena.drain_near_first() {
            self.forget(item.id());
            if distance < boundary {
                outcome.evicted.extend(first.attach(Arc::clone(&item)));
                outcome.to_first.push(item);
            } else {
                outcome.evicted.extend(second.attach(Arc::clone(&item)));
                outcome.to_second.push(item);
            }
        }
        trace!(
            consumer = %consumer,
            to_first = outcome.to_first.len(),
            to_second = outcome.to_second.len(),
            "Relocated consumer range"
        );
        outcome
    }

    fn forget(&mut self, id: TaskId) {
        if self.index.remove(&id).is_some() {
            self.placed -= 1;
        }
        self.bumped.retain(|bumped| *bumped != id);
    }

    fn touch(&mut self, consumer: ConsumerId) {
        self.recency.retain(|c| *c != consumer);
        self.recency.push_front(consumer);
    }

    fn prune(&mut self, consumer: ConsumerId) {
        if self.arenas.get(&consumer).is_some_and(|arena| arena.occupied == 0) {
            self.arenas.remove(&consumer);
            self.recency.retain(|c| *c != consumer);
        }
    }

    fn find(&self, id: TaskId) -> Option<&Arc<Prioritizable>> {
        let consumer = self.index.get(&id)?;
        self.arenas.get(consumer)?.find(id)
    }

    fn take_placed(&mut self, id: TaskId) -> Option<Arc<Prioritizable>> {
        let consumer = *self.index.get(&id)?;
        let item = self.arenas.get_mut(&consumer)?.remove(id)?;
        self.forget(id);
        self.prune(consumer);
        Some(item)
    }
}

impl PriorityAccessor for ConsumerRangeAccessor {
    fn attach(&mut self, item: Arc<Prioritizable>) -> Vec<Arc<Prioritizable>> {
        let Some(key) = item.placement() else {
            return self.unplaced.attach(item);
        };
        self.take_placed(item.id());

        let arena = self
            .arenas
            .entry(key.consumer)
            .or_insert_with(|| SlotArena::new(key.look_ahead));
        let mut evicted = Vec::new();
        if arena.look_ahead != key.look_ahead {
            evicted.extend(arena.resize(key.look_ahead));
        }
        evicted.extend(arena.place(key.position, Arc::clone(&item)));

        self.index.insert(item.id(), key.consumer);
        self.placed += 1;
        for gone in &evicted {
            self.forget(gone.id());
            gone.cancel();
        }
        self.touch(key.consumer);

        if !evicted.is_empty() {
            trace!(
                consumer = %key.consumer,
                position = key.position,
                evicted = evicted.len(),
                "Look-ahead window slid"
            );
        }
        evicted
    }

    fn detach(&mut self, item: &Prioritizable) -> bool {
        if item.placement().is_none() {
            return self.unplaced.detach(item);
        }
        self.take_placed(item.id()).is_some()
    }

    fn peek(&self) -> Option<Arc<Prioritizable>> {
        if let Some(item) = self.bumped.iter().find_map(|id| self.find(*id)) {
            return Some(Arc::clone(item));
        }
        self.recency
            .iter()
            .find_map(|consumer| self.arenas.get(consumer).and_then(SlotArena::head))
            .map(Arc::clone)
            .or_else(|| self.unplaced.peek())
    }

    fn pop(&mut self) -> Option<Arc<Prioritizable>> {
        while let Some(id) = self.bumped.pop_front() {
            if let Some(item) = self.take_placed(id) {
                return Some(item);
            }
        }
        let next = self.recency.iter().find_map(|consumer| {
            self.arenas
                .get(consumer)
                .and_then(SlotArena::head_index)
                .map(|index| (*consumer, index))
        });
        let Some((consumer, index)) = next else {
            return self.unplaced.pop();
        };
        let item = self.arenas.get_mut(&consumer)?.take(index)?;
        self.forget(item.id());
        self.prune(consumer);
        Some(item)
    }

    fn len(&self) -> usize {
        self.placed + self.unplaced.len()
    }

    fn contains(&self, item: &Prioritizable) -> bool {
        self.index.contains_key(&item.id()) || self.unplaced.contains(item)
    }

    fn move_to_front(&mut self, item: &Prioritizable) -> bool {
        let Some(key) = item.placement() else {
            return self.unplaced.move_to_front(item);
        };
        if !self.index.contains_key(&item.id()) {
            return false;
        }
        self.bumped.retain(|id| *id != item.id());
        self.bumped.push_front(item.id());
        self.touch(key.consumer);
        true
    }

    fn as_consumer_range(&mut self) -> Option<&mut ConsumerRangeAccessor> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::scheduling::task::{noop_task, placed_task};
    use crate::domain::entities::CacheKey;

    const LIST: ConsumerId = ConsumerId(1);
    const GRID: ConsumerId = ConsumerId(2);

    fn at(consumer: ConsumerId, position: usize, look_ahead: LookAhead) -> Arc<Prioritizable> {
        placed_task(
            &format!("{consumer}/{position}"),
            CacheKey::new(consumer, position, look_ahead),
        )
    }

    fn keys(items: &[Arc<Prioritizable>]) -> Vec<String> {
        items.iter().map(|i| i.logical_key().to_string()).collect()
    }

    fn drain(accessor: &mut ConsumerRangeAccessor) -> Vec<String> {
        let items: Vec<_> = std::iter::from_fn(|| accessor.pop()).collect();
        keys(&items)
    }

    #[test]
    fn test_forward_scroll_pops_nearest_first() {
        let window = LookAhead::new(2, 2);
        let mut range = ConsumerRangeAccessor::new();
        for position in 0..3 {
            assert!(range.attach(at(LIST, position, window)).is_empty());
        }
        assert_eq!(range.len(), 3);
        assert_eq!(
            range.peek().map(|i| i.logical_key().to_string()).as_deref(),
            Some("consumer-1/0")
        );
        assert_eq!(
            drain(&mut range),
            vec!["consumer-1/0", "consumer-1/1", "consumer-1/2"]
        );
    }

    #[test]
    fn test_backward_scroll_pops_highest_first() {
        let window = LookAhead::new(2, 2);
        let mut range = ConsumerRangeAccessor::new();
        for position in [10, 9, 8] {
            assert!(range.attach(at(LIST, position, window)).is_empty());
        }
        assert_eq!(
            drain(&mut range),
            vec!["consumer-1/10", "consumer-1/9", "consumer-1/8"]
        );
    }

    #[test]
    fn test_eviction_count_matches_slots_exceeded() {
        let window = LookAhead::new(1, 2);
        let mut range = ConsumerRangeAccessor::new();
        let first: Vec<_> = (0..3).map(|p| at(LIST, p, window)).collect();
        for item in &first {
            range.attach(Arc::clone(item));
        }

        let evicted = range.attach(at(LIST, 4, window));

        assert_eq!(keys(&evicted), vec!["consumer-1/0", "consumer-1/1"]);
        assert!(evicted.iter().all(|item| item.is_cancelled()));
        assert_eq!(range.len(), 2);
        assert!(!first[2].is_cancelled());
    }

    #[test]
    fn test_same_position_replaces() {
        let window = LookAhead::default();
        let mut range = ConsumerRangeAccessor::new();
        let old = at(LIST, 3, window);
        range.attach(Arc::clone(&old));
        let evicted = range.attach(at(LIST, 3, window));
        assert_eq!(evicted.len(), 1);
        assert!(old.is_cancelled());
        assert_eq!(range.len(), 1);
    }

    #[test]
    fn test_most_recent_consumer_first() {
        let window = LookAhead::default();
        let mut range = ConsumerRangeAccessor::new();
        range.attach(at(LIST, 0, window));
        range.attach(at(GRID, 0, window));
        assert_eq!(drain(&mut range), vec!["consumer-2/0", "consumer-1/0"]);
    }

    #[test]
    fn test_move_to_front_and_idempotent_bump() {
        let window = LookAhead::default();
        let mut range = ConsumerRangeAccessor::new();
        range.attach(at(LIST, 0, window));
        let far = at(LIST, 5, window);
        range.attach(Arc::clone(&far));
        assert!(range.move_to_front(&far));
        assert!(range.move_to_front(&far));
        assert_eq!(drain(&mut range), vec!["consumer-1/5", "consumer-1/0"]);
    }

    #[test]
    fn test_detach_and_contains() {
        let mut range = ConsumerRangeAccessor::new();
        let item = at(LIST, 0, LookAhead::default());
        range.attach(Arc::clone(&item));
        assert!(range.contains(&item));
        assert!(range.detach(&item));
        assert!(!range.contains(&item));
        assert!(range.is_empty());
        assert_eq!(range.consumer_len(LIST), 0);
    }

    #[test]
    fn test_unplaced_items_follow_consumers() {
        let mut range = ConsumerRangeAccessor::new();
        range.attach(noop_task("loose"));
        range.attach(at(LIST, 0, LookAhead::default()));
        assert_eq!(drain(&mut range), vec!["consumer-1/0", "loose"]);
    }

    #[test]
    fn test_swap_splits_at_memory_boundary_without_loss() {
        let window = LookAhead::new(2, 2);
        let mut range = ConsumerRangeAccessor::new();
        for position in 0..4 {
            range.attach(at(LIST, position, window));
        }
        let mut memory = ConsumerRangeAccessor::new();
        let mut disk = ConsumerRangeAccessor::new();

        let outcome = range.swap(LIST, &mut memory, &mut disk);

        assert!(range.is_empty());
        assert!(outcome.evicted.is_empty());
        assert_eq!(keys(&outcome.to_first), vec!["consumer-1/0", "consumer-1/1"]);
        assert_eq!(keys(&outcome.to_second), vec!["consumer-1/2", "consumer-1/3"]);
        assert_eq!(memory.len() + disk.len(), 4);
    }

    #[test]
    fn test_drain_consumer_leaves_others() {
        let window = LookAhead::default();
        let mut range = ConsumerRangeAccessor::new();
        range.attach(at(LIST, 0, window));
        range.attach(at(LIST, 1, window));
        range.attach(at(GRID, 0, window));
        let drained = range.drain_consumer(LIST);
        assert_eq!(drained.len(), 2);
        assert_eq!(range.len(), 1);
        assert_eq!(range.consumer_len(GRID), 1);
    }
}
