//! Single-flight registry of pending operations.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use parking_lot::Mutex;
use tracing::trace;

/// Result of removing one listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelOutcome<K> {
    /// Operation the listener was waiting on.
    pub key: K,
    /// True if it was the last listener and the operation was dropped.
    pub key_removed: bool,
}

/// Result of moving an operation's listeners to another tracker.
#[derive(Debug)]
pub struct TransferOutcome<K, L, P> {
    /// Keys that did not exist in the destination before the transfer, in
    /// first-seen order. The caller must start these operations.
    pub created: Vec<K>,
    /// Listeners moved.
    pub moved: usize,
    /// Listeners the remap declined, with their parameters.
    pub dropped: Vec<(L, P)>,
}

impl<K, L, P> TransferOutcome<K, L, P> {
    fn empty() -> Self {
        Self {
            created: Vec::new(),
            moved: 0,
            dropped: Vec::new(),
        }
    }
}

struct TrackerState<K, L, P> {
    pending: HashMap<K, Vec<(L, P)>>,
    owners: HashMap<L, K>,
}

impl<K, L, P> TrackerState<K, L, P>
where
    K: Eq + Hash + Clone,
    L: Eq + Hash + Copy,
{
    fn detach(&mut self, listener: &L) -> Option<CancelOutcome<K>> {
        let key = self.owners.remove(listener)?;
        let now_empty = match self.pending.get_mut(&key) {
            Some(listeners) => {
                listeners.retain(|(l, _)| l != listener);
                listeners.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.pending.remove(&key);
        }
        Some(CancelOutcome {
            key,
            key_removed: now_empty,
        })
    }

    fn attach(&mut self, key: K, listener: L, params: P) -> bool {
        let created = !self.pending.contains_key(&key);
        self.owners.insert(listener, key.clone());
        self.pending.entry(key).or_default().push((listener, params));
        created
    }
}

/// Maps an operation key to the listeners waiting on it.
///
/// Registering a key that is already pending joins it instead of starting a
/// second operation. Each listener waits on at most one key. Every method is
/// atomic with respect to the others.
pub struct OperationTracker<K, L, P> {
    name: &'static str,
    state: Mutex<TrackerState<K, L, P>>,
}

impl<K, L, P> OperationTracker<K, L, P>
where
    K: Eq + Hash + Clone + fmt::Debug,
    L: Eq + Hash + Copy + fmt::Debug,
{
    /// Creates an empty tracker. `name` labels log events.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(TrackerState {
                pending: HashMap::new(),
                owners: HashMap::new(),
            }),
        }
    }

    /// Returns the tracker's name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Adds `listener` to `key`, creating the key if absent.
    ///
    /// Returns true if the key was created, meaning the caller owns starting
    /// the operation. A listener registered elsewhere in this tracker is
    /// moved.
    pub fn register(&self, key: K, listener: L, params: P) -> bool {
        let mut state = self.state.lock();
        state.detach(&listener);
        let created = state.attach(key, listener, params);
        if created {
            trace!(tracker = self.name, ?listener, "Operation created");
        }
        created
    }

    /// Adds `listener` to `key` only if the key is pending. Gives the
    /// parameters back otherwise.
    ///
    /// # Errors
    /// Returns `params` when no operation for `key` is pending.
    pub fn join(&self, key: &K, listener: L, params: P) -> Result<(), P> {
        let mut state = self.state.lock();
        if !state.pending.contains_key(key) {
            return Err(params);
        }
        state.detach(&listener);
        if !state.pending.contains_key(key) {
            return Err(params);
        }
        state.attach(key.clone(), listener, params);
        Ok(())
    }

    /// Returns true if an operation for `key` is pending.
    #[must_use]
    pub fn has_pending(&self, key: &K) -> bool {
        self.state.lock().pending.contains_key(key)
    }

    /// Removes `key`, returning its listeners in registration order.
    pub fn remove_all(&self, key: &K) -> Vec<(L, P)> {
        let mut state = self.state.lock();
        let listeners = state.pending.remove(key).unwrap_or_default();
        for (listener, _) in &listeners {
            state.owners.remove(listener);
        }
        listeners
    }

    /// Moves every listener of `key` into `other`.
    ///
    /// `remap` gives each listener's destination key and parameters, or
    /// declines by handing the parameters back. The source key is removed
    /// and every listener is inserted into the destination while both locks
    /// are held, so no listener is ever observed in neither tracker.
    /// `other` must be a different tracker.
    pub fn transfer_to<K2, P2, F>(
        &self,
        key: &K,
        other: &OperationTracker<K2, L, P2>,
        mut remap: F,
    ) -> TransferOutcome<K2, L, P>
    where
        K2: Eq + Hash + Clone + fmt::Debug,
        F: FnMut(&L, P) -> Result<(K2, P2), P>,
    {
        let mut source = self.state.lock();
        let Some(listeners) = source.pending.remove(key) else {
            return TransferOutcome::empty();
        };
        for (listener, _) in &listeners {
            source.owners.remove(listener);
        }

        let mut outcome = TransferOutcome::empty();
        let mut dest = other.state.lock();
        for (listener, params) in listeners {
            match remap(&listener, params) {
                Ok((next_key, next_params)) => {
                    dest.detach(&listener);
                    if dest.attach(next_key.clone(), listener, next_params)
                        && !outcome.created.contains(&next_key)
                    {
                        outcome.created.push(next_key);
                    }
                    outcome.moved += 1;
                }
                Err(params) => outcome.dropped.push((listener, params)),
            }
        }
        drop(dest);
        drop(source);

        trace!(
            from = self.name,
            to = other.name,
            moved = outcome.moved,
            created = outcome.created.len(),
            dropped = outcome.dropped.len(),
            "Transferred listeners"
        );
        outcome
    }

    /// Removes one listener. Returns where it was waiting, or `None` if it
    /// was not pending here.
    pub fn cancel(&self, listener: &L) -> Option<CancelOutcome<K>> {
        self.state.lock().detach(listener)
    }

    /// Returns true if `listener` waits on an operation here.
    #[must_use]
    pub fn contains_listener(&self, listener: &L) -> bool {
        self.state.lock().owners.contains_key(listener)
    }

    /// Number of listeners waiting on `key`.
    #[must_use]
    pub fn listeners_of(&self, key: &K) -> usize {
        self.state.lock().pending.get(key).map_or(0, Vec::len)
    }

    /// Number of pending operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of waiting listeners across all operations.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.state.lock().owners.len()
    }
}

impl<K, L, P> fmt::Debug for OperationTracker<K, L, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("OperationTracker")
            .field("name", &self.name)
            .field("pending", &state.pending.len())
            .field("listeners", &state.owners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    type Tracker = OperationTracker<String, u32, &'static str>;

    fn tracker() -> Tracker {
        OperationTracker::new("test")
    }

    #[test]
    fn test_register_creates_once() {
        let t = tracker();
        assert!(t.register("a".into(), 1, "p1"));
        assert!(!t.register("a".into(), 2, "p2"));
        assert_eq!(t.listeners_of(&"a".to_string()), 2);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_join_requires_pending_key() {
        let t = tracker();
        assert_eq!(t.join(&"a".to_string(), 1, "p"), Err("p"));
        t.register("a".into(), 1, "p1");
        assert_eq!(t.join(&"a".to_string(), 2, "p2"), Ok(()));
        assert_eq!(t.listener_count(), 2);
    }

    #[test]
    fn test_remove_all_preserves_registration_order() {
        let t = tracker();
        t.register("a".into(), 3, "third");
        t.register("a".into(), 1, "first");
        t.register("a".into(), 2, "second");
        let removed = t.remove_all(&"a".to_string());
        assert_eq!(removed, vec![(3, "third"), (1, "first"), (2, "second")]);
        assert!(!t.has_pending(&"a".to_string()));
        assert!(!t.contains_listener(&1));
    }

    #[test]
    fn test_cancel_last_listener_removes_key() {
        let t = tracker();
        t.register("a".into(), 1, "p1");
        t.register("a".into(), 2, "p2");

        let first = t.cancel(&1);
        assert_eq!(
            first,
            Some(CancelOutcome {
                key: "a".to_string(),
                key_removed: false
            })
        );
        let last = t.cancel(&2);
        assert!(last.is_some_and(|outcome| outcome.key_removed));
        assert!(t.is_empty());
        assert!(t.cancel(&2).is_none());
    }

    #[test]
    fn test_register_moves_listener_between_keys() {
        let t = tracker();
        t.register("a".into(), 1, "p");
        t.register("b".into(), 1, "p");
        assert!(!t.has_pending(&"a".to_string()));
        assert_eq!(t.listener_count(), 1);
    }

    #[test]
    fn test_transfer_moves_remaps_and_drops() {
        let source = tracker();
        let dest: OperationTracker<u32, u32, String> = OperationTracker::new("dest");
        source.register("uri".into(), 1, "small");
        source.register("uri".into(), 2, "big");
        source.register("uri".into(), 3, "skip");
        source.register("uri".into(), 4, "small");

        let outcome = source.transfer_to(&"uri".to_string(), &dest, |_, params| match params {
            "small" => Ok((4, params.to_uppercase())),
            "big" => Ok((1, params.to_uppercase())),
            other => Err(other),
        });

        assert_eq!(outcome.created, vec![4, 1]);
        assert_eq!(outcome.moved, 3);
        assert_eq!(outcome.dropped, vec![(3, "skip")]);
        assert!(source.is_empty());
        assert_eq!(dest.listeners_of(&4), 2);
        assert_eq!(dest.listeners_of(&1), 1);
        assert!(!dest.contains_listener(&3));
    }

    #[test]
    fn test_transfer_into_existing_key_creates_nothing() {
        let source = tracker();
        let dest: OperationTracker<u32, u32, ()> = OperationTracker::new("dest");
        dest.register(7, 9, ());
        source.register("uri".into(), 1, "p");

        let outcome = source.transfer_to(&"uri".to_string(), &dest, |_, _| Ok((7, ())));

        assert!(outcome.created.is_empty());
        assert_eq!(dest.listeners_of(&7), 2);
    }

    #[test]
    fn test_concurrent_registration_creates_exactly_once() {
        let t = Arc::new(tracker());
        let handles: Vec<_> = (0..16)
            .map(|listener| {
                let t = Arc::clone(&t);
                thread::spawn(move || t.register("shared".into(), listener, "p"))
            })
            .collect();
        let created = handles
            .into_iter()
            .filter_map(|h| h.join().ok())
            .filter(|created| *created)
            .count();
        assert_eq!(created, 1);
        assert_eq!(t.listeners_of(&"shared".to_string()), 16);
    }
}
