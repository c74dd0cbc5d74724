//! Explicit, bounded retries for individual steps

use crate::client::HttpResponse;
use std::time::Duration;

/// Retry policy for one request step. The default performs no retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first (>= 1)
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub initial_backoff: Duration,

    /// Upper bound on any single delay
    pub max_backoff: Duration,

    /// Backoff factor (exponential)
    pub multiplier: f64,

    /// Jitter percentage (0.0 - 1.0) added on top of each delay
    pub jitter: f64,

    /// Statuses worth another attempt; status 0 (transport failure) is always retried
    pub retry_on_status: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// Single attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
            retry_on_status: Vec::new(),
        }
    }

    /// Exponential backoff from 100ms up to 3.2s, retrying gateway errors.
    pub fn exponential(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(3200),
            multiplier: 2.0,
            jitter: 0.2,
            retry_on_status: vec![502, 503, 504],
        }
    }

    pub fn with_retry_on_status(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retry_on_status = statuses.into_iter().collect();
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Whether `response` from attempt number `attempt` (1-based) warrants another try.
    pub fn should_retry(&self, attempt: u32, response: &HttpResponse) -> bool {
        attempt < self.max_attempts
            && (response.status == 0 || self.retry_on_status.contains(&response.status))
    }

    /// Delay after failed attempt number `attempt` (1-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        // Clamp to keep the float exponent finite
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let delay = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_backoff.as_secs_f64()))
    }

    /// Delay after failed attempt `attempt` with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        let jitter_range = (base.as_millis() as f64 * self.jitter) as u64;
        if jitter_range == 0 {
            return base;
        }
        let jitter = rand::random::<u64>() % (jitter_range + 1);
        base + Duration::from_millis(jitter)
    }
}
