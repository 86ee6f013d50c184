//! Delta delivery worker.
//!
//! One worker per dispatched delta. It owns its `(neighbor, values)` batch,
//! retries through the gateway with backoff, and on exhaustion rolls the
//! optimistic in-flight mark back so a later tick selects the values again.

use crate::ack::AckTracker;
use crate::gateway::{BroadcastPayload, GatewayError, RpcGateway};
use crate::retry::RetryPolicy;
use crate::value::{GossipValue, NodeId};
use std::sync::Arc;

/// How a delivery ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// A call completed; the in-flight mark stands
    Delivered { attempts: u32 },
    /// Every attempt failed; the values were rolled back
    Exhausted {
        attempts: u32,
        last_error: GatewayError,
    },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Delivered { attempts } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }
}

pub struct DeliveryWorker<V: GossipValue> {
    neighbor: NodeId,
    values: Vec<V>,
    gateway: Arc<dyn RpcGateway<V>>,
    tracker: Arc<AckTracker<V>>,
    policy: RetryPolicy,
}

impl<V: GossipValue> DeliveryWorker<V> {
    pub fn new(
        neighbor: NodeId,
        values: Vec<V>,
        gateway: Arc<dyn RpcGateway<V>>,
        tracker: Arc<AckTracker<V>>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            neighbor,
            values,
            gateway,
            tracker,
            policy,
        }
    }

    /// Run the delivery to completion. Never fails.
    pub async fn run(self) -> DeliveryOutcome {
        if self.values.is_empty() {
            return DeliveryOutcome::Delivered { attempts: 0 };
        }

        let neighbor = &self.neighbor;
        let gateway = &self.gateway;
        let values = &self.values;

        let retried = self
            .policy
            .retry(|attempt| async move {
                let result = gateway
                    .send(neighbor, BroadcastPayload::new(values.clone()))
                    .await;
                if let Err(e) = &result {
                    tracing::debug!(
                        neighbor = %neighbor,
                        attempt = attempt + 1,
                        error = %e,
                        "Delivery attempt failed"
                    );
                }
                result
            })
            .await;

        match retried.result {
            Ok(()) => {
                tracing::debug!(
                    neighbor = %self.neighbor,
                    count = self.values.len(),
                    attempts = retried.attempts,
                    "Delivered delta"
                );
                DeliveryOutcome::Delivered {
                    attempts: retried.attempts,
                }
            }
            Err(last_error) => {
                self.tracker.rollback(&self.neighbor, &self.values);
                tracing::warn!(
                    neighbor = %self.neighbor,
                    count = self.values.len(),
                    attempts = retried.attempts,
                    error = %last_error,
                    "Delivery exhausted retries, values rolled back"
                );
                DeliveryOutcome::Exhausted {
                    attempts: retried.attempts,
                    last_error,
                }
            }
        }
    }
}
