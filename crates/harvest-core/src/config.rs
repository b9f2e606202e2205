//! Executor configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::executor::RetryPolicy;

pub const DEFAULT_MAX_CONCURRENT: usize = 3;
pub const DEFAULT_STUCK_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
pub const DEFAULT_PROGRESS_CHANNEL_CAPACITY: usize = 256;
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Tunables for an [`Executor`](crate::executor::Executor).
///
/// Every field has a default, so a partial document deserializes fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Upper bound on jobs running at once.
    pub max_concurrent: usize,

    /// Running jobs older than this are reclaimed at startup.
    #[serde(with = "duration_millis")]
    pub stuck_timeout: Duration,

    /// How long the main loop waits when nothing is eligible yet.
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    pub progress_channel_capacity: usize,

    /// How long queued progress events may take to reach the sink once the
    /// executor winds down. Whatever is left after that is dropped.
    #[serde(with = "duration_millis")]
    pub flush_timeout: Duration,

    pub retry: RetryPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            stuck_timeout: DEFAULT_STUCK_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            progress_channel_capacity: DEFAULT_PROGRESS_CHANNEL_CAPACITY,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

/// Serde helpers for `Duration` as integer milliseconds.
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ExecutorConfig::default();
        assert_eq!(cfg.max_concurrent, 3);
        assert_eq!(cfg.retry.min_delay, Duration::from_secs(1));
        assert_eq!(cfg.retry.max_delay, Duration::from_secs(60));
        assert_eq!(cfg.retry.jitter_fraction, 0.5);
    }

    #[test]
    fn partial_document_fills_defaults() {
        let cfg: ExecutorConfig =
            serde_json::from_str(r#"{ "max_concurrent": 8, "poll_interval": 50 }"#).unwrap();
        assert_eq!(cfg.max_concurrent, 8);
        assert_eq!(cfg.poll_interval, Duration::from_millis(50));
        assert_eq!(cfg.stuck_timeout, DEFAULT_STUCK_TIMEOUT);
        assert_eq!(cfg.flush_timeout, DEFAULT_FLUSH_TIMEOUT);
        assert_eq!(cfg.retry, RetryPolicy::default());
    }

    #[test]
    fn durations_serialize_as_millis() {
        let json = serde_json::to_value(ExecutorConfig::default()).unwrap();
        assert_eq!(json["poll_interval"], 250);
        assert_eq!(json["retry"]["min_delay"], 1000);
    }
}
