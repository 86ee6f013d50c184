//! Topology table and the readiness gate it opens.
//!
//! The neighbor set is published exactly once. Readers see either the empty
//! set or the complete list, and inbound broadcast handling waits on the
//! [`ReadinessGate`] until that publish has happened.

use crate::value::NodeId;
use once_cell::sync::OnceCell;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::watch;

/// Result of applying a topology assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyUpdate {
    /// First assignment; neighbors stored and the gate opened
    Applied { neighbors: usize },
    /// A topology was already in place; the new one was dropped
    Ignored,
}

/// One-shot latch satisfied the first time topology is set
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    ready_rx: watch::Receiver<bool>,
}

impl ReadinessGate {
    pub fn is_open(&self) -> bool {
        *self.ready_rx.borrow()
    }

    /// Wait until the gate opens. Returns immediately once it has.
    ///
    /// Also returns, with the gate still closed, if the owning
    /// [`TopologyTable`] has been dropped. Check [`is_open`](Self::is_open)
    /// when that distinction matters.
    pub async fn wait(&self) {
        let mut ready_rx = self.ready_rx.clone();
        let _ = ready_rx.wait_for(|ready| *ready).await;
    }
}

/// Direct neighbors of the local node
#[derive(Debug)]
pub struct TopologyTable {
    local: NodeId,
    neighbors: OnceCell<BTreeSet<NodeId>>,
    ready_tx: watch::Sender<bool>,
}

impl TopologyTable {
    pub fn new(local: NodeId) -> Self {
        let (ready_tx, _ready_rx) = watch::channel(false);
        Self {
            local,
            neighbors: OnceCell::new(),
            ready_tx,
        }
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local
    }

    /// Store the neighbor list. First write wins; self references are dropped.
    pub fn set_neighbors(&self, neighbors: impl IntoIterator<Item = NodeId>) -> TopologyUpdate {
        let filtered: BTreeSet<NodeId> = neighbors
            .into_iter()
            .filter(|id| *id != self.local)
            .collect();
        let count = filtered.len();

        if self.neighbors.set(filtered).is_err() {
            tracing::warn!(node = %self.local, "Topology already applied, ignoring reassignment");
            return TopologyUpdate::Ignored;
        }

        self.ready_tx.send_replace(true);
        tracing::info!(node = %self.local, neighbors = count, "Topology applied");
        TopologyUpdate::Applied { neighbors: count }
    }

    /// Apply the local node's entry from a full `{node -> neighbors}` map.
    ///
    /// A map without an entry for this node still counts as the assignment:
    /// the node ends up with no neighbors and the gate opens.
    pub fn apply_assignment(&self, topology: &HashMap<NodeId, Vec<NodeId>>) -> TopologyUpdate {
        let entry = topology.get(&self.local).cloned().unwrap_or_default();
        self.set_neighbors(entry)
    }

    /// Current neighbors; empty until topology has been applied
    pub fn neighbors(&self) -> BTreeSet<NodeId> {
        self.neighbors.get().cloned().unwrap_or_default()
    }

    pub fn is_ready(&self) -> bool {
        self.neighbors.get().is_some()
    }

    pub fn gate(&self) -> ReadinessGate {
        ReadinessGate {
            ready_rx: self.ready_tx.subscribe(),
        }
    }

    pub async fn wait_ready(&self) {
        self.gate().wait().await;
    }
}
