#![deny(clippy::dbg_macro)]
#![deny(clippy::todo)]
#![allow(missing_docs)]
//! # Gossamer Node - Maelstrom broadcast node
//!
//! Wraps the `gossamer-broadcast` engine in the Maelstrom envelope protocol:
//! newline-delimited JSON on stdin, replies and peer RPCs on stdout, logs on
//! stderr.
//!
//! - [`protocol`]: envelope and body types
//! - [`runtime`]: outbound queue, RPC reply routing, the engine's gateway
//! - [`node`]: request handlers and the serving loop
//! - [`config`]: layered node configuration

pub mod config;
pub mod error;
pub mod node;
pub mod protocol;
pub mod runtime;

pub use config::NodeConfig;
pub use error::{ConfigError, NodeError};
pub use node::{serve, Node};
pub use protocol::{Body, Envelope, ErrorCode, Payload, Value};
pub use runtime::{EnvelopeGateway, Runtime};
