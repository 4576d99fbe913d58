// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-frame retry policy.
//!
//! A frame gets at most `max_attempts` tries per cycle. What happens between
//! tries depends on the error class (see [`RetryAction`]); how long the engine
//! waits is governed by [`RetryConfig`], an exponential backoff with optional
//! jitter.
//!
//! # Example
//!
//! ```rust,ignore
//! use fieldpoll_core::retry::RetryConfig;
//! use std::time::Duration;
//!
//! let retry = RetryConfig::default().with_initial_delay(Duration::from_millis(20));
//! assert_eq!(retry.delay_for(1), Duration::from_millis(20));
//! assert_eq!(retry.delay_for(2), Duration::from_millis(40));
//! ```

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// =============================================================================
// RetryAction
// =============================================================================

/// What the engine does with its session after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Close the session and try again on a fresh one.
    Reconnect,
    /// Keep the session and try again on it.
    Reuse,
    /// Give up on this frame for the current cycle.
    Stop,
}

// =============================================================================
// RetryConfig
// =============================================================================

/// Retry bound and backoff for a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per frame per cycle, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt.
    #[serde(default = "default_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Upper bound on any delay.
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    /// Growth factor between consecutive delays.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0) to randomize delays.
    #[serde(default)]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(50)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: 0.0,
        }
    }
}

impl RetryConfig {
    /// A single attempt and no delay.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    /// Sets the attempt bound.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the first delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the jitter factor.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns true if another attempt is allowed after `attempt` (1-based).
    pub fn allows_another(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Returns the delay to wait after failed `attempt` (1-based).
    ///
    /// `min(initial_delay * multiplier^(attempt-1), max_delay)`, then jittered.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_micros() as f64
            * self
                .multiplier
                .max(1.0)
                .powi(attempt.saturating_sub(1) as i32);
        let capped = base.min(self.max_delay.as_micros() as f64);
        apply_jitter(Duration::from_micros(capped.max(0.0) as u64), self.jitter)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid_value(
                "retry.max_attempts",
                "at least one attempt is required",
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::invalid_value(
                "retry.jitter",
                "must be between 0.0 and 1.0",
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::invalid_value(
                "retry.multiplier",
                "must be a finite number >= 1.0",
            ));
        }
        Ok(())
    }
}

/// Applies symmetric random jitter to a duration.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }
    let micros = duration.as_micros() as f64;
    let spread = micros * jitter_factor.min(1.0);
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    Duration::from_micros((micros + offset).max(0.0) as u64)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_delay, Duration::from_millis(50));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_attempt_bound() {
        let config = RetryConfig::default();
        assert!(config.allows_another(1));
        assert!(config.allows_another(2));
        assert!(!config.allows_another(3));
        assert!(!RetryConfig::no_retry().allows_another(1));
    }

    #[test]
    fn test_exponential_delays() {
        let config = RetryConfig::default()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(300));
        assert_eq!(config.delay_for(1), Duration::from_millis(100));
        assert_eq!(config.delay_for(2), Duration::from_millis(200));
        assert_eq!(config.delay_for(3), Duration::from_millis(300));
        assert_eq!(config.delay_for(8), Duration::from_millis(300));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let config = RetryConfig::default()
            .with_initial_delay(Duration::from_millis(100))
            .with_jitter(0.5);
        for _ in 0..100 {
            let delay = config.delay_for(1);
            assert!(delay >= Duration::from_millis(49));
            assert!(delay <= Duration::from_millis(151));
        }
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(RetryConfig::default().with_max_attempts(0).validate().is_err());
        assert!(RetryConfig::default().with_jitter(1.5).validate().is_err());
    }

    #[test]
    fn test_deserialize_humantime() {
        let config: RetryConfig =
            serde_json::from_str(r#"{"max_attempts": 5, "initial_delay": "20ms"}"#).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.initial_delay, Duration::from_millis(20));
        assert_eq!(config.max_delay, Duration::from_secs(1));
    }
}
