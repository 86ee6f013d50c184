//! The broadcast engine aggregate.
//!
//! Owns the store, topology table and ack tracker for one node and hands
//! shared references to the scheduler, workers and inbound handler.

use crate::ack::AckTracker;
use crate::config::BroadcastConfig;
use crate::gateway::RpcGateway;
use crate::inbound::{InboundHandler, InboundOutcome};
use crate::scheduler::{AntiEntropyScheduler, TickReport};
use crate::store::MessageStore;
use crate::topology::{TopologyTable, TopologyUpdate};
use crate::value::{GossipValue, NodeId};
use crate::wire::InboundBroadcast;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct BroadcastEngine<V: GossipValue> {
    config: BroadcastConfig,
    store: Arc<MessageStore<V>>,
    topology: Arc<TopologyTable>,
    tracker: Arc<AckTracker<V>>,
    gateway: Arc<dyn RpcGateway<V>>,
    inbound: InboundHandler<V>,
}

impl<V: GossipValue> BroadcastEngine<V> {
    pub fn new(local: NodeId, gateway: Arc<dyn RpcGateway<V>>, config: BroadcastConfig) -> Self {
        let store = Arc::new(MessageStore::new());
        let topology = Arc::new(TopologyTable::new(local));
        let inbound = InboundHandler::new(Arc::clone(&store), topology.gate());

        Self {
            config,
            store,
            topology,
            tracker: Arc::new(AckTracker::new()),
            gateway,
            inbound,
        }
    }

    pub fn local_id(&self) -> &NodeId {
        self.topology.local_id()
    }

    pub fn store(&self) -> &Arc<MessageStore<V>> {
        &self.store
    }

    pub fn topology(&self) -> &Arc<TopologyTable> {
        &self.topology
    }

    pub fn tracker(&self) -> &Arc<AckTracker<V>> {
        &self.tracker
    }

    /// Handler peers and clients deliver broadcasts to
    pub fn inbound(&self) -> InboundHandler<V> {
        self.inbound.clone()
    }

    /// Local client injection; learned immediately, no topology wait
    pub fn inject(&self, value: V) -> bool {
        self.store.learn(value)
    }

    /// Accept an inbound broadcast (waits for topology)
    pub async fn accept(&self, broadcast: InboundBroadcast<V>) -> InboundOutcome {
        self.inbound.accept(broadcast).await
    }

    /// Everything learned so far, in first-seen order
    pub fn read(&self) -> Vec<V> {
        self.store.snapshot()
    }

    pub fn set_neighbors(&self, neighbors: impl IntoIterator<Item = NodeId>) -> TopologyUpdate {
        self.topology.set_neighbors(neighbors)
    }

    pub fn apply_topology(&self, topology: &HashMap<NodeId, Vec<NodeId>>) -> TopologyUpdate {
        self.topology.apply_assignment(topology)
    }

    pub fn scheduler(&self) -> AntiEntropyScheduler<V> {
        AntiEntropyScheduler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.topology),
            Arc::clone(&self.tracker),
            Arc::clone(&self.gateway),
            self.config.gossip_interval,
            self.config.retry.clone(),
        )
    }

    /// Run a single anti-entropy round outside the periodic loop
    pub fn tick(&self) -> TickReport {
        self.scheduler().tick()
    }

    /// Start the periodic scheduler on the current runtime
    pub fn spawn_scheduler(&self, shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.scheduler().run(shutdown_rx))
    }
}
