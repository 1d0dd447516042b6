//! Exponential backoff policy for transient delivery failures.

use std::time::Duration;

use nudge_core::config::RetryConfig;

/// Backoff schedule: `base * multiplier^(attempt-1)`, clamped to a maximum.
///
/// Permanent failures never consult this policy. A message is abandoned once
/// `max_attempts` transient failures have been recorded.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    max_attempts: u32,
    send_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_secs(config.base_delay_secs),
            multiplier: config.multiplier,
            max_delay: Duration::from_secs(config.max_delay_secs),
            max_attempts: config.max_attempts.max(1),
            send_timeout: Duration::from_secs(config.send_timeout_secs),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Time box for one send call.
    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Delay before the next try, given how many attempts already failed.
    /// Saturates at `max_delay` instead of overflowing for large counts.
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1);
        let factor = self.multiplier.max(1.0).powi(exponent.min(64) as i32);
        let secs = (self.base_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Whether another attempt is allowed after `failed_attempts` tries.
    pub fn allows_retry(&self, failed_attempts: u32) -> bool {
        failed_attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
