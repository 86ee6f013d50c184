//! Inbound broadcast handling.

use crate::store::MessageStore;
use crate::topology::ReadinessGate;
use crate::value::GossipValue;
use crate::wire::InboundBroadcast;
use std::sync::Arc;

/// Acknowledgment returned for every accepted broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundOutcome {
    /// How many of the received values were new to this node
    pub new_values: usize,
    /// How many values the message carried
    pub received: usize,
}

/// Feeds peer and client broadcasts into the message store.
///
/// Waits for the topology gate before touching the store, so nothing is
/// learned from broadcast traffic until this node knows who to gossip to.
#[derive(Debug, Clone)]
pub struct InboundHandler<V> {
    store: Arc<MessageStore<V>>,
    gate: ReadinessGate,
}

impl<V: GossipValue> InboundHandler<V> {
    pub fn new(store: Arc<MessageStore<V>>, gate: ReadinessGate) -> Self {
        Self { store, gate }
    }

    /// Accept a validated broadcast. Always succeeds, new values or not.
    pub async fn accept(&self, broadcast: InboundBroadcast<V>) -> InboundOutcome {
        self.gate.wait().await;

        let received = broadcast.len();
        let new_values = self.store.learn_all(broadcast.into_values());
        tracing::trace!(received, new_values, "Accepted broadcast");

        InboundOutcome {
            new_values,
            received,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::TopologyTable;
    use crate::value::NodeId;

    #[tokio::test]
    async fn duplicate_broadcasts_are_acknowledged() {
        let topology = TopologyTable::new(NodeId::from("n1"));
        topology.set_neighbors(Vec::new());
        let store = Arc::new(MessageStore::new());
        let handler = InboundHandler::new(Arc::clone(&store), topology.gate());

        let first = handler.accept(InboundBroadcast::Batch(vec![1i64, 2])).await;
        let second = handler.accept(InboundBroadcast::Single(2)).await;

        assert_eq!(first, InboundOutcome { new_values: 2, received: 2 });
        assert_eq!(second, InboundOutcome { new_values: 0, received: 1 });
        assert_eq!(store.snapshot(), vec![1, 2]);
    }

    #[tokio::test]
    async fn empty_batch_is_accepted() {
        let topology = TopologyTable::new(NodeId::from("n1"));
        topology.set_neighbors(Vec::new());
        let handler = InboundHandler::new(Arc::new(MessageStore::<i64>::new()), topology.gate());
        let outcome = handler.accept(InboundBroadcast::Batch(Vec::new())).await;
        assert_eq!(outcome.received, 0);
    }
}
