//! Multi-class priority queue.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::accessor::PriorityAccessor;
use super::consumer_range::ConsumerRangeAccessor;
use super::sequenced::{QueueAccessor, StackAccessor};
use super::task::{Prioritizable, TaskId};
use crate::domain::entities::{ConsumerId, Priority};

/// Priority classes of the loader's queues, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PriorityClass {
    /// On-screen requests, newest first.
    Visible,
    /// Memory look-ahead placed in a consumer window.
    MemoryPrecacheRange,
    /// Memory look-ahead without a placement.
    MemoryPrecache,
    /// Disk look-ahead placed in a consumer window.
    DiskPrecacheRange,
    /// Disk look-ahead without a placement.
    DiskPrecache,
    /// Look-ahead of consumers the user is leaving.
    Deprioritized,
}

impl PriorityClass {
    /// Every class in priority order.
    pub const ALL: [Self; 6] = [
        Self::Visible,
        Self::MemoryPrecacheRange,
        Self::MemoryPrecache,
        Self::DiskPrecacheRange,
        Self::DiskPrecache,
        Self::Deprioritized,
    ];

    /// Position of the class in [`ALL`](Self::ALL).
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Class a request of `priority` is queued in.
    #[must_use]
    pub const fn for_request(priority: Priority, placed: bool) -> Self {
        match (priority, placed) {
            (Priority::Visible, _) => Self::Visible,
            (Priority::MemoryPrecache, true) => Self::MemoryPrecacheRange,
            (Priority::MemoryPrecache, false) => Self::MemoryPrecache,
            (Priority::DiskPrecache, true) => Self::DiskPrecacheRange,
            (Priority::DiskPrecache, false) => Self::DiskPrecache,
            (Priority::Deprioritized, _) => Self::Deprioritized,
        }
    }

    fn accessor(self) -> Box<dyn PriorityAccessor> {
        match self {
            Self::Visible => Box::new(StackAccessor::new()),
            Self::MemoryPrecache | Self::DiskPrecache => Box::new(QueueAccessor::new()),
            Self::MemoryPrecacheRange | Self::DiskPrecacheRange | Self::Deprioritized => {
                Box::new(ConsumerRangeAccessor::new())
            }
        }
    }
}

impl fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Visible => "visible",
            Self::MemoryPrecacheRange => "memory-precache-range",
            Self::MemoryPrecache => "memory-precache",
            Self::DiskPrecacheRange => "disk-precache-range",
            Self::DiskPrecache => "disk-precache",
            Self::Deprioritized => "deprioritized",
        };
        f.write_str(name)
    }
}

/// Ordered set of accessors. Items are served from the lowest-indexed
/// non-empty class; each item lives in at most one class.
pub struct AuxiliaryQueue {
    accessors: Vec<Box<dyn PriorityAccessor>>,
    locations: HashMap<TaskId, usize>,
}

impl AuxiliaryQueue {
    /// Creates a queue over explicit accessors, highest priority first.
    #[must_use]
    pub fn new(accessors: Vec<Box<dyn PriorityAccessor>>) -> Self {
        Self {
            accessors,
            locations: HashMap::new(),
        }
    }

    /// Creates a queue with one accessor per [`PriorityClass`].
    #[must_use]
    pub fn with_standard_classes() -> Self {
        Self::new(
            PriorityClass::ALL
                .iter()
                .map(|class| class.accessor())
                .collect(),
        )
    }

    /// Number of classes.
    #[must_use]
    pub fn class_count(&self) -> usize {
        self.accessors.len()
    }

    /// Queues `item` in `class`, moving it out of any class it was in.
    /// Out-of-range classes are clamped to the lowest priority.
    /// Returns items evicted to make room; they are no longer queued.
    pub fn add(&mut self, item: Arc<Prioritizable>, class: usize) -> Vec<Arc<Prioritizable>> {
        let Some(last) = self.accessors.len().checked_sub(1) else {
            item.cancel();
            return vec![item];
        };
        let class = class.min(last);
        if let Some(current) = self.locations.remove(&item.id()) {
            self.accessors[current].detach(&item);
        }
        item.set_class(class);
        let id = item.id();
        let evicted = self.accessors[class].attach(item);
        self.locations.insert(id, class);
        for gone in &evicted {
            self.locations.remove(&gone.id());
        }
        evicted
    }

    /// Returns the next item without removing it.
    #[must_use]
    pub fn peek_highest_priority(&self) -> Option<Arc<Prioritizable>> {
        self.accessors.iter().find_map(|accessor| accessor.peek())
    }

    /// Removes and returns the next item.
    pub fn remove_highest_priority(&mut self) -> Option<Arc<Prioritizable>> {
        let item = self.accessors.iter_mut().find_map(|accessor| accessor.pop())?;
        self.locations.remove(&item.id());
        Some(item)
    }

    /// Moves `item` to the head of its class.
    pub fn bump(&mut self, item: &Prioritizable) -> bool {
        match self.locations.get(&item.id()) {
            Some(&class) => self.accessors[class].move_to_front(item),
            None => false,
        }
    }

    /// Removes `item` from whichever class holds it.
    pub fn remove(&mut self, item: &Prioritizable) -> bool {
        match self.locations.remove(&item.id()) {
            Some(class) => self.accessors[class].detach(item),
            None => false,
        }
    }

    /// Returns true if `item` is queued.
    #[must_use]
    pub fn contains(&self, item: &Prioritizable) -> bool {
        self.locations.contains_key(&item.id())
    }

    /// Class currently holding `item`.
    #[must_use]
    pub fn class_of(&self, item: &Prioritizable) -> Option<usize> {
        self.locations.get(&item.id()).copied()
    }

    /// Total queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Items queued in `class`.
    #[must_use]
    pub fn class_len(&self, class: usize) -> usize {
        self.accessors.get(class).map_or(0, |accessor| accessor.len())
    }

    /// Moves a consumer's items out of the range accessor at `from`, splitting
    /// them between `first` and `second` at the consumer's memory look-ahead.
    /// The three classes must differ. Returns evicted items.
    pub fn relocate_consumer(
        &mut self,
        consumer: ConsumerId,
        from: usize,
        first: usize,
        second: usize,
    ) -> Vec<Arc<Prioritizable>> {
        let [source, a, b] = match self.accessors.get_disjoint_mut([from, first, second]) {
            Ok(accessors) => accessors,
            Err(_) => return Vec::new(),
        };
        let Some(range) = source.as_consumer_range() else {
            return Vec::new();
        };
        let outcome = range.swap(consumer, a.as_mut(), b.as_mut());
        for item in &outcome.to_first {
            item.set_class(first);
            self.locations.insert(item.id(), first);
        }
        for item in &outcome.to_second {
            item.set_class(second);
            self.locations.insert(item.id(), second);
        }
        for gone in &outcome.evicted {
            self.locations.remove(&gone.id());
        }
        outcome.evicted
    }

    /// Moves every item of `consumer` held by the range accessor at `from`
    /// into class `to`. Returns evicted items.
    pub fn demote_consumer(
        &mut self,
        consumer: ConsumerId,
        from: usize,
        to: usize,
    ) -> Vec<Arc<Prioritizable>> {
        if from == to {
            return Vec::new();
        }
        let drained = self
            .accessors
            .get_mut(from)
            .and_then(|accessor| accessor.as_consumer_range())
            .map(|range| range.drain_consumer(consumer))
            .unwrap_or_default();
        let mut evicted = Vec::new();
        for item in drained {
            self.locations.remove(&item.id());
            evicted.extend(self.add(item, to));
        }
        evicted
    }
}

impl fmt::Debug for AuxiliaryQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuxiliaryQueue")
            .field("classes", &self.accessors.len())
            .field("len", &self.locations.len())
            .finish()
    }
}
