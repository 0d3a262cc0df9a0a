//! Tunables for the coordinator and the preflight endpoint.

use serde::Deserialize;
use std::time::Duration;

/// Default number of preflight status polls before giving up.
pub const DEFAULT_POLL_ATTEMPTS: u32 = 30;

/// Default wait between preflight status polls.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default time the endpoint waits for a preflight before answering `Pending`.
pub const DEFAULT_REPLY_WAIT_MS: u64 = 500;

/// Default time a finished, uncollected preflight result is kept.
pub const DEFAULT_RESULT_RETENTION_MS: u64 = 60_000;

/// Default number of migration statuses the coordinator remembers.
pub const DEFAULT_STATUS_HISTORY: usize = 256;

/// Source-side coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Maximum number of `preflight_status` polls
    pub preflight_poll_attempts: u32,
    /// Sleep before each poll, in milliseconds
    pub preflight_poll_interval_ms: u64,
    /// Statuses kept for `status`/`statuses`; finished ones are evicted
    /// oldest first beyond this
    pub status_history: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            preflight_poll_attempts: DEFAULT_POLL_ATTEMPTS,
            preflight_poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            status_history: DEFAULT_STATUS_HISTORY,
        }
    }
}

impl CoordinatorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.preflight_poll_interval_ms)
    }

    /// Upper bound on time spent polling.
    pub fn poll_budget(&self) -> Duration {
        self.poll_interval() * self.preflight_poll_attempts
    }
}

/// Destination-side endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// How long `prepare_live_migration` waits inline before replying `Pending`
    pub preflight_reply_wait_ms: u64,
    /// How long a finished preflight waits for `preflight_status` before it
    /// is dropped
    pub preflight_result_retention_ms: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            preflight_reply_wait_ms: DEFAULT_REPLY_WAIT_MS,
            preflight_result_retention_ms: DEFAULT_RESULT_RETENTION_MS,
        }
    }
}

impl EndpointConfig {
    pub fn reply_wait(&self) -> Duration {
        Duration::from_millis(self.preflight_reply_wait_ms)
    }

    pub fn result_retention(&self) -> Duration {
        Duration::from_millis(self.preflight_result_retention_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.preflight_poll_attempts, 30);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.poll_budget(), Duration::from_secs(30));
        assert_eq!(config.status_history, 256);

        let endpoint = EndpointConfig::default();
        assert_eq!(endpoint.result_retention(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_override() {
        let config: CoordinatorConfig =
            serde_json::from_str(r#"{"preflight_poll_attempts": 3}"#).unwrap();
        assert_eq!(config.preflight_poll_attempts, 3);
        assert_eq!(config.preflight_poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
    }
}
