//! Node error types.

use gossamer_broadcast::NodeId;
use std::path::PathBuf;

/// Errors raised by the envelope runtime
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// A message needed the node id before `init` arrived
    #[error("Node has not been initialized")]
    NotInitialized,

    /// No reply arrived within the RPC timeout
    #[error("RPC {msg_id} to {dest} timed out after {timeout_ms}ms")]
    RpcTimeout {
        dest: NodeId,
        msg_id: u64,
        timeout_ms: u64,
    },

    /// The outbound writer has gone away
    #[error("Outbound channel closed")]
    OutboundClosed,

    /// Envelope could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Reading stdin or writing stdout failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid value for `{field}`: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
