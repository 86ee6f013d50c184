//! Broadcast engine runtime configuration.

use crate::retry::RetryPolicy;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastConfig {
    /// Period of the anti-entropy scheduler
    pub gossip_interval: Duration,
    /// Retry policy applied by every delivery worker
    pub retry: RetryPolicy,
}

impl BroadcastConfig {
    pub fn with_gossip_interval(mut self, interval: Duration) -> Self {
        self.gossip_interval = interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            gossip_interval: Duration::from_millis(100),
            retry: RetryPolicy::default(),
        }
    }
}
