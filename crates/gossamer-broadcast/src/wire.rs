//! Inbound broadcast wire shapes and validation.

use crate::value::GossipValue;

/// Wire format parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Required fields missing or of the wrong type
    #[error("Malformed broadcast payload: {reason}")]
    Malformed {
        /// What was wrong with the payload
        reason: String,
    },
}

impl WireError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

/// A validated inbound broadcast: `{message}` or `{messages: [...]}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundBroadcast<V> {
    Single(V),
    Batch(Vec<V>),
}

impl<V: GossipValue> InboundBroadcast<V> {
    /// Build from the two optional wire fields.
    ///
    /// `message` takes precedence when both are present.
    pub fn from_parts(message: Option<V>, messages: Option<Vec<V>>) -> Result<Self, WireError> {
        match (message, messages) {
            (Some(value), _) => Ok(Self::Single(value)),
            (None, Some(values)) => Ok(Self::Batch(values)),
            (None, None) => Err(WireError::malformed(
                "expected a `message` or `messages` field",
            )),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Batch(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_values(self) -> Vec<V> {
        match self {
            Self::Single(value) => vec![value],
            Self::Batch(values) => values,
        }
    }
}
