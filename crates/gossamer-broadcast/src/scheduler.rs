//! Anti-entropy scheduler.
//!
//! Every tick takes one store snapshot, claims a delta per neighbor and
//! spawns a delivery worker for each non-empty delta. The scheduler never
//! waits on the workers it spawns.

use crate::ack::AckTracker;
use crate::delivery::{DeliveryOutcome, DeliveryWorker};
use crate::gateway::RpcGateway;
use crate::retry::RetryPolicy;
use crate::store::MessageStore;
use crate::topology::TopologyTable;
use crate::value::{GossipValue, NodeId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// One dispatch made during a tick
#[derive(Debug)]
pub struct Dispatch {
    pub neighbor: NodeId,
    pub values: usize,
    pub handle: JoinHandle<DeliveryOutcome>,
}

/// Everything a single tick dispatched
#[derive(Debug, Default)]
pub struct TickReport {
    pub dispatches: Vec<Dispatch>,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.dispatches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.dispatches.len()
    }

    pub fn neighbors(&self) -> Vec<NodeId> {
        self.dispatches.iter().map(|d| d.neighbor.clone()).collect()
    }

    /// Wait for every worker of this tick. Only tests and callers that want
    /// to observe outcomes need this; the run loop never does.
    pub async fn join(self) -> Vec<(NodeId, DeliveryOutcome)> {
        let (neighbors, handles): (Vec<_>, Vec<_>) = self
            .dispatches
            .into_iter()
            .map(|d| (d.neighbor, d.handle))
            .unzip();

        futures::future::join_all(handles)
            .await
            .into_iter()
            .zip(neighbors)
            .filter_map(|(joined, neighbor)| match joined {
                Ok(outcome) => Some((neighbor, outcome)),
                Err(e) => {
                    tracing::error!(neighbor = %neighbor, error = %e, "Delivery task failed");
                    None
                }
            })
            .collect()
    }
}

pub struct AntiEntropyScheduler<V: GossipValue> {
    store: Arc<MessageStore<V>>,
    topology: Arc<TopologyTable>,
    tracker: Arc<AckTracker<V>>,
    gateway: Arc<dyn RpcGateway<V>>,
    interval: Duration,
    retry: RetryPolicy,
}

impl<V: GossipValue> AntiEntropyScheduler<V> {
    pub fn new(
        store: Arc<MessageStore<V>>,
        topology: Arc<TopologyTable>,
        tracker: Arc<AckTracker<V>>,
        gateway: Arc<dyn RpcGateway<V>>,
        interval: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            topology,
            tracker,
            gateway,
            interval,
            retry,
        }
    }

    /// Run one reconciliation round.
    ///
    /// Must be called from within a Tokio runtime; workers are spawned onto it.
    pub fn tick(&self) -> TickReport {
        let neighbors = self.topology.neighbors();
        if neighbors.is_empty() {
            return TickReport::default();
        }

        let snapshot = self.store.snapshot();
        let mut report = TickReport::default();

        for neighbor in neighbors {
            let delta = self.tracker.claim(&neighbor, &snapshot);
            if delta.is_empty() {
                continue;
            }

            tracing::debug!(neighbor = %neighbor, count = delta.len(), "Dispatching delta");
            let values = delta.len();
            let worker = DeliveryWorker::new(
                neighbor.clone(),
                delta,
                Arc::clone(&self.gateway),
                Arc::clone(&self.tracker),
                self.retry.clone(),
            );
            report.dispatches.push(Dispatch {
                neighbor,
                values,
                handle: tokio::spawn(worker.run()),
            });
        }

        report
    }

    /// Tick forever until `shutdown_rx` reports `true` or its sender drops
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Anti-entropy scheduler started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    // Fire and forget: dropping the handles detaches the workers.
                    drop(self.tick());
                }
            }
        }

        tracing::info!("Anti-entropy scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{BroadcastPayload, GatewayError};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingGateway {
        sent: Mutex<Vec<(NodeId, Vec<i64>)>>,
        fail: bool,
    }

    #[async_trait]
    impl RpcGateway<i64> for RecordingGateway {
        async fn send(
            &self,
            neighbor: &NodeId,
            payload: BroadcastPayload<i64>,
        ) -> Result<(), GatewayError> {
            self.sent.lock().push((neighbor.clone(), payload.values));
            if self.fail {
                Err(GatewayError::send_failed(neighbor, "unreachable"))
            } else {
                Ok(())
            }
        }
    }

    struct Fixture {
        store: Arc<MessageStore<i64>>,
        topology: Arc<TopologyTable>,
        tracker: Arc<AckTracker<i64>>,
        gateway: Arc<RecordingGateway>,
        scheduler: AntiEntropyScheduler<i64>,
    }

    fn fixture(fail: bool) -> Fixture {
        let store = Arc::new(MessageStore::new());
        let topology = Arc::new(TopologyTable::new(NodeId::from("n1")));
        let tracker = Arc::new(AckTracker::new());
        let gateway = Arc::new(RecordingGateway {
            fail,
            ..Default::default()
        });
        let scheduler = AntiEntropyScheduler::new(
            Arc::clone(&store),
            Arc::clone(&topology),
            Arc::clone(&tracker),
            gateway.clone(),
            Duration::from_millis(100),
            RetryPolicy::default(),
        );
        Fixture {
            store,
            topology,
            tracker,
            gateway,
            scheduler,
        }
    }

    #[tokio::test]
    async fn no_dispatch_before_topology() {
        let f = fixture(false);
        f.store.learn(1);
        assert!(f.scheduler.tick().is_empty());
        assert_eq!(f.tracker.tracked_neighbors(), 0);
    }

    #[tokio::test]
    async fn dispatches_one_batch_per_neighbor_with_a_delta() {
        let f = fixture(false);
        f.topology.set_neighbors(vec!["n2".into(), "n3".into()]);
        f.store.learn_all(vec![1, 2, 3]);
        f.tracker.mark_inflight(&"n3".into(), &[1, 2, 3]);

        let report = f.scheduler.tick();
        assert_eq!(report.neighbors(), vec![NodeId::from("n2")]);
        assert_eq!(report.dispatches[0].values, 3);

        let outcomes = report.join().await;
        assert!(outcomes.iter().all(|(_, o)| o.is_delivered()));
        assert_eq!(
            *f.gateway.sent.lock(),
            vec![(NodeId::from("n2"), vec![1, 2, 3])]
        );
    }

    #[tokio::test]
    async fn second_tick_skips_inflight_values() {
        let f = fixture(false);
        f.topology.set_neighbors(vec!["n2".into()]);
        f.store.learn_all(vec![1, 2]);

        let first = f.scheduler.tick();
        let second = f.scheduler.tick();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());

        f.store.learn(3);
        let third = f.scheduler.tick();
        first.join().await;
        let outcomes = third.join().await;
        assert_eq!(outcomes.len(), 1);
        let sent = f.gateway.sent.lock();
        assert_eq!(sent.len(), 2);
        assert!(sent.contains(&(NodeId::from("n2"), vec![3])));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_delivery_is_reselected_next_tick() {
        let f = fixture(true);
        f.topology.set_neighbors(vec!["n2".into()]);
        f.store.learn_all(vec![2, 3]);

        let outcomes = f.scheduler.tick().join().await;
        assert!(matches!(outcomes[0].1, DeliveryOutcome::Exhausted { attempts: 3, .. }));

        let retry = f.scheduler.tick();
        assert_eq!(retry.len(), 1);
        assert_eq!(retry.dispatches[0].values, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_stops_on_shutdown() {
        let f = fixture(false);
        f.topology.set_neighbors(vec!["n2".into()]);
        f.store.learn(9);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let gateway = Arc::clone(&f.gateway);
        let task = tokio::spawn(f.scheduler.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(350)).await;
        shutdown_tx.send_replace(true);
        task.await.unwrap();

        // Only the first tick had anything to send.
        assert_eq!(*gateway.sent.lock(), vec![(NodeId::from("n2"), vec![9])]);
    }
}
