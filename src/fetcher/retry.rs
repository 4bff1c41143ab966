//! Retry policy: which outcomes are retried and how long to wait

use rand::Rng;
use std::time::Duration;

/// Bounded-attempt retry settings
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Base delay doubled on every retry
    pub backoff_base: Duration,

    /// Upper bound of the random delay added to each backoff
    pub backoff_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(300),
            backoff_jitter: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows attempt number `attempt` (0-based)
    ///
    /// `base * 2^attempt + random(0..=jitter)`. The random part spreads out
    /// retries from many workers that hit the same transient failure.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponential = self
            .backoff_base
            .saturating_mul(1u32 << attempt.min(16));

        let jitter_ms = self.backoff_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };

        exponential + Duration::from_millis(jitter)
    }
}

/// HTTP statuses worth another attempt: 429 and the whole 5xx range
pub fn is_retryable_status(status_code: u16) -> bool {
    status_code == 429 || (500..=599).contains(&status_code)
}
