//! RPC gateway seam between the engine and the transport.
//!
//! The engine only needs one operation: send a batch of values to a
//! neighbor and learn whether the call completed. Reply content is never
//! inspected; any completed call counts as an acknowledgment.

pub mod memory;

use crate::value::{GossipValue, NodeId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Batch of values sent to one neighbor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = "V: GossipValue"))]
pub struct BroadcastPayload<V> {
    /// Values in the order they were selected for delivery
    #[serde(rename = "messages")]
    pub values: Vec<V>,
}

impl<V> BroadcastPayload<V> {
    pub fn new(values: Vec<V>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Gateway operation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The call did not complete within the gateway's own timeout
    #[error("Call to {neighbor} timed out after {timeout_ms}ms")]
    Timeout {
        /// Target of the call
        neighbor: NodeId,
        /// Timeout that elapsed
        timeout_ms: u64,
    },
    /// The transport could not carry the message
    #[error("Failed to send to {neighbor}: {reason}")]
    SendFailed {
        /// Target of the call
        neighbor: NodeId,
        /// Reason for the failure
        reason: String,
    },
    /// The gateway has shut down
    #[error("Gateway closed")]
    Closed,
}

impl GatewayError {
    pub fn send_failed(neighbor: &NodeId, reason: impl Into<String>) -> Self {
        Self::SendFailed {
            neighbor: neighbor.clone(),
            reason: reason.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Point-to-point RPC used by delivery workers.
///
/// Implementations enforce their own per-call timeout and report it as
/// [`GatewayError::Timeout`].
#[async_trait]
pub trait RpcGateway<V: GossipValue>: Send + Sync {
    /// Send a batch to a neighbor and wait for the call to complete
    async fn send(&self, neighbor: &NodeId, payload: BroadcastPayload<V>)
        -> Result<(), GatewayError>;
}

#[async_trait]
impl<V: GossipValue, T: RpcGateway<V> + ?Sized> RpcGateway<V> for Arc<T> {
    async fn send(
        &self,
        neighbor: &NodeId,
        payload: BroadcastPayload<V>,
    ) -> Result<(), GatewayError> {
        (**self).send(neighbor, payload).await
    }
}
