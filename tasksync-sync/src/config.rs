use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Device name for identification in logs.
    pub device_name: String,
    /// Retries after the first failed transport call.
    pub max_retries: u32,
    /// Delay before the first retry (ms). Doubles per retry.
    pub base_backoff_ms: u64,
    /// Upper bound on a single retry delay (ms).
    pub max_backoff_ms: u64,
    /// How long a pulled record may wait for its parent before it is
    /// dropped and reported (s).
    pub orphan_retention_secs: u64,
    /// Timeout for a single transport call (ms).
    pub transport_timeout_ms: u64,
    /// Interval between scheduled sync rounds (ms).
    pub poll_interval_ms: u64,
    /// Whether the scheduler starts a round when a local write commits.
    pub sync_on_local_change: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            device_name: "tasksync device".to_string(),
            max_retries: 3,
            base_backoff_ms: 250,
            max_backoff_ms: 30_000,
            orphan_retention_secs: 7 * 24 * 60 * 60,
            transport_timeout_ms: 30_000,
            poll_interval_ms: 60_000,
            sync_on_local_change: true,
        }
    }
}

impl SyncConfig {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        const MAX_EXPONENT: u32 = 16;

        let exponent = attempt.saturating_sub(1).min(MAX_EXPONENT);
        let delay = self.base_backoff_ms.saturating_mul(1 << exponent);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }

    pub fn transport_timeout(&self) -> Duration {
        Duration::from_millis(self.transport_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn orphan_retention(&self) -> chrono::Duration {
        i64::try_from(self.orphan_retention_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}
