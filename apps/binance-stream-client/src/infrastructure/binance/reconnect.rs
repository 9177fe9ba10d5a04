//! Reconnection Policy
//!
//! Delay schedule for re-establishing the stream connection after an
//! unplanned close. The default is a fixed delay; an optional multiplier
//! and jitter turn it into exponential backoff. Every delay the policy
//! hands out is at least [`MIN_RECONNECT_DELAY`].

use std::time::Duration;

use rand::Rng;

/// Lower bound for every reconnect delay.
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Clamped to the floor.
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Multiplier applied after each attempt (1.0 keeps the delay fixed).
    pub multiplier: f64,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
    /// Maximum number of reconnection attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: MIN_RECONNECT_DELAY,
            max_delay: Duration::from_secs(30),
            multiplier: 1.0,
            jitter_factor: 0.0,
            max_attempts: 0, // Unlimited
        }
    }
}

impl ReconnectConfig {
    /// Fixed-delay configuration with the given timeout.
    #[must_use]
    pub fn fixed(timeout: Duration) -> Self {
        Self {
            initial_delay: timeout,
            ..Self::default()
        }
    }

    /// Build from the client settings.
    #[must_use]
    pub fn from_settings(settings: &crate::ReconnectSettings) -> Self {
        Self {
            initial_delay: settings.timeout,
            max_delay: settings.delay_max,
            multiplier: settings.delay_multiplier,
            jitter_factor: settings.jitter_factor,
            max_attempts: settings.max_attempts,
        }
    }

    /// The first delay after applying the floor.
    #[must_use]
    pub fn effective_initial_delay(&self) -> Duration {
        self.initial_delay.max(MIN_RECONNECT_DELAY)
    }
}

/// Reconnection policy with an enforced delay floor.
///
/// # Example
///
/// ```rust
/// use binance_stream_client::infrastructure::binance::reconnect::{
///     MIN_RECONNECT_DELAY, ReconnectConfig, ReconnectPolicy,
/// };
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::fixed(Duration::from_millis(10)));
///
/// // Configured timeouts below the floor are raised to it
/// assert_eq!(policy.next_delay(), Some(MIN_RECONNECT_DELAY));
///
/// // Simulate successful connection
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        let initial_delay = config.effective_initial_delay();
        Self {
            config,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    /// Get the next delay, or `None` once the attempt limit is reached.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        self.attempt_count += 1;

        let delay = self.apply_jitter(self.current_delay).max(MIN_RECONNECT_DELAY);

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.config.multiplier).round();
        let max_millis = self
            .config
            .max_delay
            .max(self.config.effective_initial_delay())
            .as_millis();
        let next_millis = if !scaled.is_finite() {
            max_millis
        } else if scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let capped = u64::try_from(next_millis.min(max_millis)).unwrap_or(u64::MAX);
        self.current_delay = Duration::from_millis(capped).max(MIN_RECONNECT_DELAY);

        Some(delay)
    }

    /// Reset the policy after a successful connection.
    pub fn reset(&mut self) {
        self.current_delay = self.config.effective_initial_delay();
        self.attempt_count = 0;
    }

    /// Get the current attempt count.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Check if reconnection should continue.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor.min(1.0);
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

/// Error type for reconnection failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconnectError {
    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxAttemptsExceeded(u32),
}
