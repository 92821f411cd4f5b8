//! Adaptive Cadence: polling interval that reacts to the error rate
//!
//! A poller normally runs at its baseline interval. Sustained failures slow it
//! down so a struggling upstream is not hammered, and the first success brings
//! it straight back to baseline.
//!
//! # Key Concepts
//!
//! - **Slowdown**: every time the consecutive error count reaches a multiple of
//!   `max_consecutive_errors`, the interval becomes
//!   `min(baseline × multiplier^⌊errors / max_consecutive_errors⌋, max_interval)`
//! - **Isolated retries**: a failed attempt asks for a quick retry while the
//!   retry counter is below `max_retries`; once it reaches the limit the counter
//!   resets for the next regular tick
//! - **Speed-up**: a success resets both counters and restores the baseline
//!
//! # Example
//!
//! ```
//! use kiosk_core_resilience::cadence::{AdaptiveCadence, CadenceConfig};
//! use std::time::Duration;
//!
//! let mut cadence = AdaptiveCadence::new(CadenceConfig::default());
//!
//! let decision = cadence.record_failure();
//! assert!(decision.retry);
//! assert_eq!(decision.consecutive_errors, 1);
//! assert_eq!(cadence.interval(), Duration::from_secs(30));
//! ```

use crate::error::ResilienceError;
use std::time::Duration;
use tracing::debug;

/// Configuration for an adaptive polling cadence
#[derive(Debug, Clone, PartialEq)]
pub struct CadenceConfig {
    /// Interval used while the upstream is healthy
    pub baseline: Duration,

    /// Lower clamp for any configured baseline
    pub min_interval: Duration,

    /// Upper clamp for baseline and slowdown
    pub max_interval: Duration,

    /// Factor applied per slowdown step
    pub slowdown_multiplier: f64,

    /// Consecutive failures per slowdown step
    pub max_consecutive_errors: u32,

    /// Failed attempts that get an isolated retry before the counter resets
    pub max_retries: u32,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            baseline: Duration::from_secs(30),
            min_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(300),
            slowdown_multiplier: 2.0,
            max_consecutive_errors: 5,
            max_retries: 3,
        }
    }
}

impl CadenceConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.min_interval.is_zero() {
            return Err(ResilienceError::InvalidConfig(
                "min_interval must be greater than 0".to_string(),
            ));
        }
        if self.min_interval > self.max_interval {
            return Err(ResilienceError::InvalidConfig(format!(
                "min_interval ({:?}) exceeds max_interval ({:?})",
                self.min_interval, self.max_interval
            )));
        }
        if self.slowdown_multiplier < 1.0 || !self.slowdown_multiplier.is_finite() {
            return Err(ResilienceError::InvalidConfig(
                "slowdown_multiplier must be a finite value >= 1.0".to_string(),
            ));
        }
        if self.max_consecutive_errors == 0 {
            return Err(ResilienceError::InvalidConfig(
                "max_consecutive_errors must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// What the caller should do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureDecision {
    /// Schedule an isolated retry after the retry delay
    pub retry: bool,

    /// New interval when this failure triggered a slowdown step
    pub slowed_to: Option<Duration>,

    /// Consecutive failures including this one
    pub consecutive_errors: u32,
}

/// Interval state machine for a single poller
#[derive(Debug, Clone)]
pub struct AdaptiveCadence {
    config: CadenceConfig,
    interval: Duration,
    consecutive_errors: u32,
    retry_count: u32,
}

impl AdaptiveCadence {
    /// Create a cadence; the baseline is clamped into `[min_interval, max_interval]`
    pub fn new(config: CadenceConfig) -> Self {
        let baseline = clamp(config.baseline, config.min_interval, config.max_interval);
        let config = CadenceConfig { baseline, ..config };
        Self {
            interval: baseline,
            config,
            consecutive_errors: 0,
            retry_count: 0,
        }
    }

    /// Current effective interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Configured baseline interval
    pub fn baseline(&self) -> Duration {
        self.config.baseline
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// True while the interval is above baseline
    pub fn is_degraded(&self) -> bool {
        self.interval > self.config.baseline
    }

    pub fn config(&self) -> &CadenceConfig {
        &self.config
    }

    /// Record a failed attempt and decide on retry and slowdown.
    pub fn record_failure(&mut self) -> FailureDecision {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.retry_count = self.retry_count.saturating_add(1);

        let mut slowed_to = None;
        if self.consecutive_errors % self.config.max_consecutive_errors == 0 {
            let next = self.backoff_interval();
            if next != self.interval {
                debug!(
                    from_ms = self.interval.as_millis() as u64,
                    to_ms = next.as_millis() as u64,
                    consecutive_errors = self.consecutive_errors,
                    "cadence slowing down"
                );
                self.interval = next;
                slowed_to = Some(next);
            }
        }

        let retry = self.retry_count < self.config.max_retries;
        if !retry {
            self.retry_count = 0;
        }

        FailureDecision {
            retry,
            slowed_to,
            consecutive_errors: self.consecutive_errors,
        }
    }

    /// Record a successful attempt.
    ///
    /// Returns the restored baseline when the cadence was slowed down.
    pub fn record_success(&mut self) -> Option<Duration> {
        self.consecutive_errors = 0;
        self.retry_count = 0;
        if self.interval > self.config.baseline {
            self.interval = self.config.baseline;
            return Some(self.interval);
        }
        None
    }

    /// Replace the baseline, clamped into `[min_interval, max_interval]`.
    ///
    /// The effective interval is recomputed from the current error streak.
    pub fn set_baseline(&mut self, baseline: Duration) -> Duration {
        let clamped = clamp(baseline, self.config.min_interval, self.config.max_interval);
        self.config.baseline = clamped;
        self.interval = self.backoff_interval();
        clamped
    }

    /// `min(baseline × multiplier^⌊k/max⌋, max_interval)` for the current streak `k`
    fn backoff_interval(&self) -> Duration {
        let steps = self.consecutive_errors / self.config.max_consecutive_errors;
        if steps == 0 {
            return self.config.baseline;
        }
        let factor = self
            .config
            .slowdown_multiplier
            .powi(steps.min(i32::MAX as u32) as i32);
        let scaled_ms = self.config.baseline.as_millis() as f64 * factor;
        let capped_ms = scaled_ms.min(self.config.max_interval.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }
}

fn clamp(value: Duration, min: Duration, max: Duration) -> Duration {
    value.max(min).min(max)
}
