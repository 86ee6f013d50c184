//! Deduplicating message store.
//!
//! Holds every value this node has learned, once, in first-seen order.
//! The set and the order vector are updated under one write lock so no
//! reader ever observes a value in one but not the other.

use crate::value::GossipValue;
use parking_lot::RwLock;
use std::collections::HashSet;

#[derive(Debug)]
struct StoreInner<V> {
    seen: HashSet<V>,
    order: Vec<V>,
}

/// Append-only set of learned values
#[derive(Debug)]
pub struct MessageStore<V> {
    inner: RwLock<StoreInner<V>>,
}

impl<V: GossipValue> MessageStore<V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                seen: HashSet::new(),
                order: Vec::new(),
            }),
        }
    }

    /// Record a value.
    ///
    /// Returns `true` only for the call that actually inserted `value`.
    pub fn learn(&self, value: V) -> bool {
        let mut inner = self.inner.write();
        if inner.seen.contains(&value) {
            return false;
        }
        inner.seen.insert(value.clone());
        inner.order.push(value);
        true
    }

    /// Learn every value of a batch, returning how many were new
    pub fn learn_all(&self, values: impl IntoIterator<Item = V>) -> usize {
        values
            .into_iter()
            .map(|value| self.learn(value))
            .filter(|new| *new)
            .count()
    }

    /// Point-in-time copy of all values in first-seen order
    pub fn snapshot(&self) -> Vec<V> {
        self.inner.read().order.clone()
    }

    pub fn contains(&self, value: &V) -> bool {
        self.inner.read().seen.contains(value)
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: GossipValue> Default for MessageStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn learn_reports_new_only_once() {
        let store = MessageStore::new();
        assert!(store.learn(7i64));
        assert!(!store.learn(7));
        assert_eq!(store.snapshot(), vec![7]);
    }

    #[test]
    fn snapshot_preserves_first_seen_order() {
        let store = MessageStore::new();
        for v in [3i64, 1, 2, 1, 3, 4] {
            store.learn(v);
        }
        assert_eq!(store.snapshot(), vec![3, 1, 2, 4]);
    }

    #[test]
    fn learn_all_counts_new_values() {
        let store = MessageStore::new();
        store.learn(1i64);
        assert_eq!(store.learn_all(vec![1, 2, 2, 3]), 2);
        assert_eq!(store.len(), 3);
        assert!(store.contains(&3));
        assert!(!store.contains(&4));
    }

    #[test]
    fn concurrent_learners_agree_on_a_single_winner() {
        let store = Arc::new(MessageStore::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.learn(42i64))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(store.snapshot(), vec![42]);
    }

    proptest! {
        #[test]
        fn order_never_contains_duplicates(values in proptest::collection::vec(0i64..32, 0..128)) {
            let store = MessageStore::new();
            let mut expected_new = HashSet::new();
            for v in &values {
                prop_assert_eq!(store.learn(*v), expected_new.insert(*v));
            }

            let snapshot = store.snapshot();
            let unique: HashSet<_> = snapshot.iter().copied().collect();
            prop_assert_eq!(unique.len(), snapshot.len());
            prop_assert_eq!(unique, expected_new);
        }
    }
}
