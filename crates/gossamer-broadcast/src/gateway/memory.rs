//! In-memory cluster gateway for testing
//!
//! Routes sends straight into the target node's [`InboundHandler`], with
//! per-link fault injection. Provides the same completion semantics as a real
//! gateway: a call either returns once the peer has accepted the batch or
//! fails with a transport error or timeout.

use super::{BroadcastPayload, GatewayError, RpcGateway};
use crate::inbound::InboundHandler;
use crate::value::{GossipValue, NodeId};
use crate::wire::InboundBroadcast;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkFault {
    /// Fail this many upcoming calls, then recover
    FailNext(u32),
    /// Fail every call until healed
    Partitioned,
}

/// A record of a batch that reached its destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredBatch<V> {
    pub from: NodeId,
    pub to: NodeId,
    pub values: Vec<V>,
}

/// Shared routing fabric for a set of in-process nodes
pub struct MemoryCluster<V: GossipValue> {
    nodes: RwLock<HashMap<NodeId, InboundHandler<V>>>,
    faults: Mutex<HashMap<(NodeId, NodeId), LinkFault>>,
    delivered: Mutex<Vec<DeliveredBatch<V>>>,
    call_timeout: Duration,
}

impl<V: GossipValue> MemoryCluster<V> {
    pub fn new() -> Arc<Self> {
        Self::with_call_timeout(Duration::from_secs(1))
    }

    pub fn with_call_timeout(call_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            nodes: RwLock::new(HashMap::new()),
            faults: Mutex::new(HashMap::new()),
            delivered: Mutex::new(Vec::new()),
            call_timeout,
        })
    }

    /// Make a node reachable through the cluster
    pub fn register(&self, id: NodeId, handler: InboundHandler<V>) {
        self.nodes.write().insert(id, handler);
    }

    /// Gateway that sends on behalf of `local`
    pub fn gateway_for(self: &Arc<Self>, local: NodeId) -> Arc<MemoryGateway<V>> {
        Arc::new(MemoryGateway {
            local,
            cluster: Arc::clone(self),
        })
    }

    /// Fail the next `count` calls on the `from -> to` link
    pub fn fail_next(&self, from: &NodeId, to: &NodeId, count: u32) {
        self.faults
            .lock()
            .insert((from.clone(), to.clone()), LinkFault::FailNext(count));
    }

    /// Fail every call on the `from -> to` link until [`heal`](Self::heal)
    pub fn partition(&self, from: &NodeId, to: &NodeId) {
        self.faults
            .lock()
            .insert((from.clone(), to.clone()), LinkFault::Partitioned);
    }

    pub fn heal(&self, from: &NodeId, to: &NodeId) {
        self.faults.lock().remove(&(from.clone(), to.clone()));
    }

    /// Every batch that was accepted by its destination, in delivery order
    pub fn delivered(&self) -> Vec<DeliveredBatch<V>> {
        self.delivered.lock().clone()
    }

    /// Returns true if the call should fail, consuming one injected failure
    fn take_fault(&self, from: &NodeId, to: &NodeId) -> bool {
        let mut faults = self.faults.lock();
        let key = (from.clone(), to.clone());
        match faults.get(&key).copied() {
            Some(LinkFault::Partitioned) => true,
            Some(LinkFault::FailNext(remaining)) if remaining > 0 => {
                if remaining == 1 {
                    faults.remove(&key);
                } else {
                    faults.insert(key, LinkFault::FailNext(remaining - 1));
                }
                true
            }
            Some(LinkFault::FailNext(_)) => {
                faults.remove(&key);
                false
            }
            None => false,
        }
    }
}

/// One node's view of a [`MemoryCluster`]
pub struct MemoryGateway<V: GossipValue> {
    local: NodeId,
    cluster: Arc<MemoryCluster<V>>,
}

#[async_trait]
impl<V: GossipValue> RpcGateway<V> for MemoryGateway<V> {
    async fn send(
        &self,
        neighbor: &NodeId,
        payload: BroadcastPayload<V>,
    ) -> Result<(), GatewayError> {
        if self.cluster.take_fault(&self.local, neighbor) {
            return Err(GatewayError::send_failed(neighbor, "injected link fault"));
        }

        let handler = self
            .cluster
            .nodes
            .read()
            .get(neighbor)
            .cloned()
            .ok_or_else(|| GatewayError::send_failed(neighbor, "unknown node"))?;

        let values = payload.values.clone();
        tokio::time::timeout(
            self.cluster.call_timeout,
            handler.accept(InboundBroadcast::Batch(payload.values)),
        )
        .await
        .map_err(|_| GatewayError::Timeout {
            neighbor: neighbor.clone(),
            timeout_ms: self.cluster.call_timeout.as_millis() as u64,
        })?;

        self.cluster.delivered.lock().push(DeliveredBatch {
            from: self.local.clone(),
            to: neighbor.clone(),
            values,
        });
        Ok(())
    }
}
