//! Per-neighbor acknowledgment tracking.
//!
//! A value recorded for a neighbor means it was either delivered or is
//! currently in flight to that neighbor. Entries go in at dispatch time and
//! only come out when a dispatch exhausts its retries.

use crate::value::{GossipValue, NodeId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

/// Unsynchronized ack table; [`AckTracker`] wraps it in a mutex
#[derive(Debug)]
pub struct AckTable<V> {
    acked: HashMap<NodeId, HashSet<V>>,
}

impl<V: GossipValue> AckTable<V> {
    pub fn new() -> Self {
        Self {
            acked: HashMap::new(),
        }
    }

    /// Values of `all_values` not yet known to `neighbor`, in input order.
    ///
    /// Creates an empty entry for a neighbor seen for the first time.
    pub fn delta_for(&mut self, neighbor: &NodeId, all_values: &[V]) -> Vec<V> {
        let acked = self.acked.entry(neighbor.clone()).or_default();
        all_values
            .iter()
            .filter(|value| !acked.contains(*value))
            .cloned()
            .collect()
    }

    pub fn mark_inflight(&mut self, neighbor: &NodeId, values: &[V]) {
        self.acked
            .entry(neighbor.clone())
            .or_default()
            .extend(values.iter().cloned());
    }

    pub fn rollback(&mut self, neighbor: &NodeId, values: &[V]) {
        if let Some(acked) = self.acked.get_mut(neighbor) {
            for value in values {
                acked.remove(value);
            }
        }
    }

    pub fn is_acked(&self, neighbor: &NodeId, value: &V) -> bool {
        self.acked
            .get(neighbor)
            .is_some_and(|acked| acked.contains(value))
    }

    pub fn acked_count(&self, neighbor: &NodeId) -> usize {
        self.acked.get(neighbor).map_or(0, HashSet::len)
    }

    pub fn tracked_neighbors(&self) -> usize {
        self.acked.len()
    }
}

impl<V: GossipValue> Default for AckTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe ack tracker shared by the scheduler and delivery workers
#[derive(Debug)]
pub struct AckTracker<V> {
    table: Mutex<AckTable<V>>,
}

impl<V: GossipValue> AckTracker<V> {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(AckTable::new()),
        }
    }

    pub fn delta_for(&self, neighbor: &NodeId, all_values: &[V]) -> Vec<V> {
        self.table.lock().delta_for(neighbor, all_values)
    }

    pub fn mark_inflight(&self, neighbor: &NodeId, values: &[V]) {
        self.table.lock().mark_inflight(neighbor, values);
    }

    pub fn rollback(&self, neighbor: &NodeId, values: &[V]) {
        self.table.lock().rollback(neighbor, values);
    }

    /// Compute the delta and mark it in flight under one lock.
    ///
    /// Two overlapping ticks can never both claim the same value for the
    /// same neighbor.
    pub fn claim(&self, neighbor: &NodeId, all_values: &[V]) -> Vec<V> {
        let mut table = self.table.lock();
        let delta = table.delta_for(neighbor, all_values);
        if !delta.is_empty() {
            table.mark_inflight(neighbor, &delta);
        }
        delta
    }

    pub fn is_acked(&self, neighbor: &NodeId, value: &V) -> bool {
        self.table.lock().is_acked(neighbor, value)
    }

    pub fn acked_count(&self, neighbor: &NodeId) -> usize {
        self.table.lock().acked_count(neighbor)
    }

    pub fn tracked_neighbors(&self) -> usize {
        self.table.lock().tracked_neighbors()
    }
}

impl<V: GossipValue> Default for AckTracker<V> {
    fn default() -> Self {
        Self::new()
    }
}
