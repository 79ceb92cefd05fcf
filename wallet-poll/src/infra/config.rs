use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_MAX_CALLS_PER_BATCH: usize = 100;
const DEFAULT_POLL_INTERVAL_MS: u64 = 30_000;
const DEFAULT_RPC_MAX_RETRIES: u8 = 3;
const DEFAULT_RPC_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_SLOW_CALL_THRESHOLD_MS: i64 = 2_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Upper bound on sub-calls packed into one `aggregate3` request.
    pub max_calls_per_batch: usize,
    pub poll_interval_ms: u64,
    pub rpc_max_retries: u8,
    pub rpc_timeout_ms: u64,
    pub slow_call_threshold_ms: i64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_calls_per_batch: DEFAULT_MAX_CALLS_PER_BATCH,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            rpc_max_retries: DEFAULT_RPC_MAX_RETRIES,
            rpc_timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
            slow_call_threshold_ms: DEFAULT_SLOW_CALL_THRESHOLD_MS,
        }
    }
}

impl PollConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Missing, unparsable or zero values fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let max_calls_per_batch = lookup("POLL_MAX_CALLS_PER_BATCH")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_MAX_CALLS_PER_BATCH);
        let poll_interval_ms = lookup("POLL_INTERVAL_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        let rpc_max_retries = lookup("RPC_MAX_RETRIES")
            .and_then(|v| v.trim().parse::<u8>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_RPC_MAX_RETRIES);
        let rpc_timeout_ms = lookup("RPC_TIMEOUT_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_RPC_TIMEOUT_MS);
        let slow_call_threshold_ms = lookup("RPC_SLOW_CALL_THRESHOLD_MS")
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_SLOW_CALL_THRESHOLD_MS);

        Self {
            max_calls_per_batch,
            poll_interval_ms,
            rpc_max_retries,
            rpc_timeout_ms,
            slow_call_threshold_ms,
        }
    }

    pub fn with_max_calls_per_batch(mut self, max_calls_per_batch: usize) -> Self {
        self.max_calls_per_batch = max_calls_per_batch.max(1);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}
