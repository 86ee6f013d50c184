//! Node configuration.
//!
//! Layered in order: built-in defaults, TOML file, `GOSSAMER_*` environment
//! variables, command-line flags. The result is validated once at the end.

use crate::error::ConfigError;
use gossamer_broadcast::{BroadcastConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides (`GOSSAMER_GOSSIP_INTERVAL_MS=50`)
pub const ENV_PREFIX: &str = "GOSSAMER_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// Anti-entropy tick period
    pub gossip_interval_ms: u64,
    /// Delivery attempts per dispatched delta, including the first
    pub max_attempts: u32,
    /// Backoff after the first failed attempt
    pub base_delay_ms: u64,
    /// Backoff cap
    pub max_delay_ms: u64,
    /// Add up to 10% random jitter to backoff delays
    pub jitter: bool,
    /// How long an outbound RPC waits for its reply
    pub rpc_timeout_ms: u64,
    /// `tracing-subscriber` filter used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            gossip_interval_ms: 100,
            max_attempts: 3,
            base_delay_ms: 50,
            max_delay_ms: 5_000,
            jitter: false,
            rpc_timeout_ms: 1_000,
            log_filter: "info".to_string(),
        }
    }
}

impl NodeConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn merge_with_env(&mut self) -> Result<(), ConfigError> {
        self.merge_with_vars(std::env::vars())
    }

    /// Apply every `GOSSAMER_<FIELD>` pair from `vars`; other keys are skipped
    pub fn merge_with_vars<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(field) = key.strip_prefix(ENV_PREFIX) {
                self.set_from_string(&field.to_lowercase(), &value)?;
            }
        }
        Ok(())
    }

    /// Set a single field by name
    pub fn set_from_string(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
        where
            T::Err: std::fmt::Display,
        {
            value
                .trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::invalid(key, e.to_string()))
        }

        match key {
            "gossip_interval_ms" => self.gossip_interval_ms = parse(key, value)?,
            "max_attempts" => self.max_attempts = parse(key, value)?,
            "base_delay_ms" => self.base_delay_ms = parse(key, value)?,
            "max_delay_ms" => self.max_delay_ms = parse(key, value)?,
            "jitter" => self.jitter = parse(key, value)?,
            "rpc_timeout_ms" => self.rpc_timeout_ms = parse(key, value)?,
            "log_filter" => self.log_filter = value.to_string(),
            other => return Err(ConfigError::invalid(other, "unknown configuration key")),
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gossip_interval_ms == 0 {
            return Err(ConfigError::invalid("gossip_interval_ms", "must be positive"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be at least 1"));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::invalid(
                "base_delay_ms",
                format!("exceeds max_delay_ms ({})", self.max_delay_ms),
            ));
        }
        if self.rpc_timeout_ms == 0 {
            return Err(ConfigError::invalid("rpc_timeout_ms", "must be positive"));
        }
        Ok(())
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential()
            .with_max_attempts(self.max_attempts)
            .with_initial_delay(Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_jitter(self.jitter)
    }

    pub fn broadcast_config(&self) -> BroadcastConfig {
        BroadcastConfig::default()
            .with_gossip_interval(Duration::from_millis(self.gossip_interval_ms))
            .with_retry(self.retry_policy())
    }
}
