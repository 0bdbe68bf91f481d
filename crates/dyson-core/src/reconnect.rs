//! Backoff policy for re-establishing push subscriptions.
//!
//! A push subscription ends whenever the device's broker connection drops.
//! The collector uses [`ReconnectOptions`] to decide how long to wait before
//! subscribing again.

use std::time::Duration;

use crate::error::{Error, Result};

/// Options for automatic re-subscription.
#[derive(Debug, Clone)]
pub struct ReconnectOptions {
    /// Maximum number of consecutive attempts (None = unlimited).
    pub max_attempts: Option<u32>,
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to use exponential backoff.
    pub use_exponential_backoff: bool,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            use_exponential_backoff: true,
        }
    }
}

impl ReconnectOptions {
    /// Create options with defaults (unlimited attempts, 1s doubling to 60s).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum number of consecutive attempts.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Set delay before the first attempt.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay between attempts.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Delay before attempt number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if !self.use_exponential_backoff {
            return self.initial_delay;
        }

        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay_ms = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }

        Duration::from_millis(delay_ms as u64).min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempts` consecutive failures.
    pub fn should_retry(&self, attempts: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts < max)
    }

    /// Validate the options.
    ///
    /// Checks that:
    /// - `backoff_multiplier` is >= 1.0
    /// - `initial_delay` is > 0
    /// - `max_delay` >= `initial_delay`
    pub fn validate(&self) -> Result<()> {
        if self.backoff_multiplier < 1.0 {
            return Err(Error::InvalidConfig(
                "backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        if self.initial_delay.is_zero() {
            return Err(Error::InvalidConfig(
                "initial_delay must be > 0".to_string(),
            ));
        }
        if self.max_delay < self.initial_delay {
            return Err(Error::InvalidConfig(
                "max_delay must be >= initial_delay".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_unlimited() {
        let opts = ReconnectOptions::default();
        assert!(opts.max_attempts.is_none());
        assert!(opts.should_retry(u32::MAX - 1));
    }

    #[test]
    fn test_exponential_delays() {
        let opts = ReconnectOptions::new()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_secs(1));
        assert_eq!(opts.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(opts.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(opts.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(opts.delay_for_attempt(4), Duration::from_secs(1));
        assert_eq!(opts.delay_for_attempt(500), Duration::from_secs(1));
    }

    #[test]
    fn test_max_attempts() {
        let opts = ReconnectOptions::new().max_attempts(3);
        assert!(opts.should_retry(2));
        assert!(!opts.should_retry(3));
    }

    #[test]
    fn test_validate() {
        assert!(ReconnectOptions::default().validate().is_ok());
        assert!(
            ReconnectOptions::new()
                .backoff_multiplier(0.5)
                .validate()
                .is_err()
        );
        assert!(
            ReconnectOptions::new()
                .initial_delay(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            ReconnectOptions::new()
                .initial_delay(Duration::from_secs(10))
                .max_delay(Duration::from_secs(1))
                .validate()
                .is_err()
        );
    }
}
