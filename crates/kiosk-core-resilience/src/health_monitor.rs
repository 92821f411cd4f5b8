//! Health Monitor: score and status from fault counters
//!
//! The monitor is a pure-logic state machine. The supervisor hands it the
//! current counters, uptime and latest memory reading; the monitor returns a
//! score in `[0, 100]`, a status, and the reasons for a critical verdict.
//!
//! # Scoring
//!
//! ```text
//! score = 100
//!       - 5 × system_errors
//!       - 5 × memory_warnings
//!       - 3 × slow_operations
//!       - min(0.5 × network_errors, 10)
//!       + min(0.5 × uptime_hours, 10)      (only past 1 h with no system errors)
//! ```
//!
//! Status is `critical` when any critical condition holds (system errors at
//! the threshold, memory above 95%, more than 10 slow operations). Otherwise
//! a score below 90 is `warning`, and so is a run of network errors since the
//! last successful refresh that reaches the network warning threshold.
//! Everything else is `healthy`. Network errors never make the status
//! critical.
//!
//! # Example
//!
//! ```
//! use kiosk_core_resilience::health_monitor::{
//!     HealthCounters, HealthMonitor, HealthSample, HealthStatus, HealthThresholds,
//! };
//! use std::time::Duration;
//!
//! let mut monitor = HealthMonitor::new(HealthThresholds::default());
//!
//! let assessment = monitor.assess(&HealthSample {
//!     counters: HealthCounters {
//!         system_errors: 10,
//!         ..Default::default()
//!     },
//!     uptime: Duration::from_secs(60),
//!     memory_usage_pct: None,
//! });
//!
//! assert_eq!(assessment.status, HealthStatus::Critical);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle status of the supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// No health check has completed yet
    #[default]
    Initializing,
    Healthy,
    Warning,
    Critical,
}

impl HealthStatus {
    /// True for states the status banner shows as "ok"
    pub fn is_ok(&self) -> bool {
        matches!(self, HealthStatus::Initializing | HealthStatus::Healthy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Initializing => "initializing",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fault counters maintained by the supervisor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCounters {
    /// Successful content refreshes
    pub refresh: u64,
    pub system_errors: u32,
    pub network_errors: u32,
    /// Network errors since the last successful refresh
    pub network_streak: u32,
    pub recovery_attempts: u32,
    pub memory_warnings: u32,
    pub slow_operations: u32,
}

/// Thresholds for the critical conditions
#[derive(Debug, Clone, PartialEq)]
pub struct HealthThresholds {
    /// System errors at or above this count are critical
    pub error_threshold: u32,

    /// Memory usage percentage above which the process is critical
    pub critical_memory_pct: f64,

    /// Slow operations above this count are critical
    pub max_slow_operations: u32,

    /// A network streak at or above this count is a warning
    pub network_warning_streak: u32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            error_threshold: 10,
            critical_memory_pct: 95.0,
            max_slow_operations: 10,
            network_warning_streak: 5,
        }
    }
}

/// Everything the monitor needs for one assessment
#[derive(Debug, Clone, Default)]
pub struct HealthSample {
    pub counters: HealthCounters,
    pub uptime: Duration,
    /// Latest memory usage percentage, when a sampler is available
    pub memory_usage_pct: Option<f64>,
}

/// Why an assessment came out critical
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum CriticalReason {
    SystemErrors { count: u32, threshold: u32 },
    MemoryPressure { usage_pct: f64 },
    SlowOperations { count: u32 },
}

impl fmt::Display for CriticalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CriticalReason::SystemErrors { count, threshold } => {
                write!(f, "{} system errors (threshold {})", count, threshold)
            }
            CriticalReason::MemoryPressure { usage_pct } => {
                write!(f, "memory usage at {:.1}%", usage_pct)
            }
            CriticalReason::SlowOperations { count } => write!(f, "{} slow operations", count),
        }
    }
}

/// Result of one assessment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthAssessment {
    pub score: f64,
    pub status: HealthStatus,
    pub critical_reasons: Vec<CriticalReason>,
}

/// Scores counters and classifies the status.
#[derive(Debug)]
pub struct HealthMonitor {
    thresholds: HealthThresholds,
    /// Total assessments performed
    check_count: u64,
    /// Assessments that came out critical
    critical_count: u64,
}

impl HealthMonitor {
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self {
            thresholds,
            check_count: 0,
            critical_count: 0,
        }
    }

    /// Score a sample and classify its status.
    pub fn assess(&mut self, sample: &HealthSample) -> HealthAssessment {
        self.check_count += 1;

        let score = Self::score(sample);
        let critical_reasons = self.critical_reasons(sample);

        let status = if !critical_reasons.is_empty() {
            self.critical_count += 1;
            HealthStatus::Critical
        } else if score < 90.0 || self.network_degraded(sample) {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        };

        HealthAssessment {
            score,
            status,
            critical_reasons,
        }
    }

    /// Health score in `[0, 100]`
    pub fn score(sample: &HealthSample) -> f64 {
        let c = &sample.counters;
        let mut score = 100.0;

        score -= 5.0 * c.system_errors as f64;
        score -= 5.0 * c.memory_warnings as f64;
        score -= 3.0 * c.slow_operations as f64;
        score -= (0.5 * c.network_errors as f64).min(10.0);

        let uptime_hours = sample.uptime.as_secs_f64() / 3600.0;
        if uptime_hours > 1.0 && c.system_errors == 0 {
            score += (0.5 * uptime_hours).min(10.0);
        }

        score.clamp(0.0, 100.0)
    }

    /// Refreshes have been failing on the network since the last success
    pub fn network_degraded(&self, sample: &HealthSample) -> bool {
        let threshold = self.thresholds.network_warning_streak;
        threshold > 0 && sample.counters.network_streak >= threshold
    }

    fn critical_reasons(&self, sample: &HealthSample) -> Vec<CriticalReason> {
        let c = &sample.counters;
        let mut reasons = Vec::new();

        if c.system_errors >= self.thresholds.error_threshold {
            reasons.push(CriticalReason::SystemErrors {
                count: c.system_errors,
                threshold: self.thresholds.error_threshold,
            });
        }

        if let Some(usage_pct) = sample.memory_usage_pct {
            if usage_pct > self.thresholds.critical_memory_pct {
                reasons.push(CriticalReason::MemoryPressure { usage_pct });
            }
        }

        if c.slow_operations > self.thresholds.max_slow_operations {
            reasons.push(CriticalReason::SlowOperations {
                count: c.slow_operations,
            });
        }

        reasons
    }

    pub fn stats(&self) -> HealthMonitorStats {
        HealthMonitorStats {
            check_count: self.check_count,
            critical_count: self.critical_count,
        }
    }

    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }
}

/// Statistics for the health monitor
#[derive(Debug, Clone)]
pub struct HealthMonitorStats {
    /// Total assessments performed
    pub check_count: u64,
    /// Assessments that came out critical
    pub critical_count: u64,
}
