//! Retry policy: decides backoff delays.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::duration_millis;

/// Exponential backoff with random jitter.
///
/// The base delay before retry `n` (0-indexed, i.e. the job's `retry_count`
/// when it failed) is `min(max_delay, min_delay * 2^n)`. Jitter adds up to
/// `jitter_fraction` of that on top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    #[serde(with = "duration_millis")]
    pub min_delay: Duration,

    #[serde(with = "duration_millis")]
    pub max_delay: Duration,

    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_fraction: 0.5,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts. Handy for tests.
    pub fn immediate() -> Self {
        Self {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_fraction: 0.0,
        }
    }

    /// Delay before the next attempt, without jitter.
    ///
    /// Example with min=1s, max=60s:
    /// - retry 0: 1s
    /// - retry 1: 2s
    /// - retry 2: 4s
    /// - retry 6: 60s (capped)
    pub fn base_delay(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.min_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_delay)
    }

    /// Delay before the next attempt, jitter included.
    pub fn next_delay(&self, retry_count: u32) -> Duration {
        self.next_delay_with(retry_count, &mut rand::thread_rng())
    }

    pub fn next_delay_with<R: Rng>(&self, retry_count: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(retry_count);
        let spread = base.as_secs_f64() * self.jitter_fraction.max(0.0);
        if !spread.is_finite() || spread <= 0.0 {
            return base;
        }
        let jitter = rng.gen_range(0.0..=spread);
        base.saturating_add(Duration::try_from_secs_f64(jitter).unwrap_or(Duration::MAX))
    }
}
