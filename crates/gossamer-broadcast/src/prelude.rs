//! Gossamer broadcast prelude.
//!
//! Curated re-exports for wiring a node.

pub use crate::{
    BroadcastConfig, BroadcastEngine, BroadcastPayload, GatewayError, GossipValue,
    InboundBroadcast, NodeId, RetryPolicy, RpcGateway, TopologyUpdate,
};
