//! Exponential backoff state for the reconnect loop.

use std::time::Duration;

use crate::config::BackoffPolicy;

/// Tracks attempt count and the growing delay between reconnect attempts.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BackoffState {
    policy: BackoffPolicy,
    attempts: u32,
    delay: Duration,
}

impl BackoffState {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            delay: policy.initial_delay,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }

    /// Advance to the next attempt, updating the delay for the subsequent
    /// attempt.
    ///
    /// Returns the delay to wait *before* performing this attempt.
    pub fn next_delay_and_advance(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }

        let current = self.delay;
        self.attempts += 1;
        let next_ms = (self.delay.as_millis() as f64) * self.policy.multiplier;
        let capped_ms = (next_ms as u64).min(self.policy.max_delay.as_millis() as u64);
        self.delay = Duration::from_millis(capped_ms);
        Some(current)
    }
}
