//! Maelstrom envelope and message body types.
//!
//! Every line on stdin/stdout is one [`Envelope`]. Bodies carry a `type`
//! tag, an optional `msg_id` and, for replies, the `in_reply_to` id of the
//! request they answer.

use gossamer_broadcast::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Broadcast values carried by this node
pub type Value = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub src: NodeId,
    pub dest: NodeId,
    pub body: Body,
}

/// Envelope whose body has not been interpreted yet
#[derive(Debug, Clone, Deserialize)]
pub struct RawEnvelope {
    pub src: NodeId,
    pub dest: NodeId,
    pub body: serde_json::Value,
}

impl RawEnvelope {
    /// `msg_id` of the body, readable even when the rest is malformed
    pub fn msg_id(&self) -> Option<u64> {
        self.body.get("msg_id").and_then(serde_json::Value::as_u64)
    }

    /// `in_reply_to` of the body; `Some(None)` when present but not an id
    pub fn in_reply_to(&self) -> Option<Option<u64>> {
        self.body.get("in_reply_to").map(serde_json::Value::as_u64)
    }

    pub fn message_type(&self) -> Option<&str> {
        self.body.get("type").and_then(serde_json::Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,
    #[serde(flatten)]
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Init {
        node_id: NodeId,
        node_ids: Vec<NodeId>,
    },
    InitOk,
    Echo {
        echo: serde_json::Value,
    },
    EchoOk {
        echo: serde_json::Value,
    },
    Generate,
    GenerateOk {
        id: String,
    },
    Broadcast {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        messages: Option<Vec<Value>>,
    },
    BroadcastOk,
    Read,
    ReadOk {
        messages: Vec<Value>,
    },
    Topology {
        topology: HashMap<NodeId, Vec<NodeId>>,
    },
    TopologyOk,
    Error {
        code: u32,
        #[serde(default)]
        text: String,
    },
    /// Any `type` this node does not implement
    #[serde(other)]
    Unknown,
}

impl Payload {
    pub fn error(code: ErrorCode, text: impl Into<String>) -> Self {
        Self::Error {
            code: code.as_u32(),
            text: text.into(),
        }
    }

    /// Peer-to-peer batch send
    pub fn broadcast_batch(values: Vec<Value>) -> Self {
        Self::Broadcast {
            message: None,
            messages: Some(values),
        }
    }
}

/// Maelstrom error codes used by this node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotSupported,
    TemporarilyUnavailable,
    MalformedRequest,
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        match self {
            ErrorCode::NotSupported => 10,
            ErrorCode::TemporarilyUnavailable => 11,
            ErrorCode::MalformedRequest => 12,
        }
    }
}
