#![deny(clippy::dbg_macro)]
#![deny(clippy::todo)]
#![allow(missing_docs)]
//! # Gossamer Broadcast - idempotent gossip dissemination
//!
//! The dissemination engine of a single broadcast node:
//! - Deduplicating message store with first-seen order
//! - One-shot topology table with a readiness gate
//! - Per-neighbor ack tracking (optimistic mark, pessimistic rollback)
//! - Periodic anti-entropy scheduler
//! - Per-dispatch delivery workers with exponential backoff
//!
//! ## Design Principles
//!
//! - **Learn Once**: every value enters the store exactly once
//! - **One Batch In Flight**: a value is claimed for at most one delivery per neighbor at a time
//! - **Eventual Retry**: a delivery that exhausts its attempts hands its values back to the next tick
//! - **Content-Agnostic Acks**: any completed gateway call counts as delivered

pub mod ack;
pub mod config;
pub mod delivery;
pub mod engine;
pub mod gateway;
pub mod inbound;
pub mod prelude;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod topology;
pub mod value;
pub mod wire;

pub use ack::{AckTable, AckTracker};
pub use config::BroadcastConfig;
pub use delivery::{DeliveryOutcome, DeliveryWorker};
pub use engine::BroadcastEngine;
pub use gateway::{BroadcastPayload, GatewayError, RpcGateway};
pub use inbound::{InboundHandler, InboundOutcome};
pub use retry::{BackoffStrategy, RetryPolicy, RetryResult};
pub use scheduler::{AntiEntropyScheduler, Dispatch, TickReport};
pub use store::MessageStore;
pub use topology::{ReadinessGate, TopologyTable, TopologyUpdate};
pub use value::{GossipValue, NodeId};
pub use wire::{InboundBroadcast, WireError};
