//! Kiosk Core Resilience: pure-logic building blocks for the display supervisor
//!
//! # Overview
//!
//! This crate holds the decision logic that keeps an always-on display running,
//! with zero knowledge of timers, networks or documents:
//!
//! - **Adaptive Cadence**: polling interval that slows down under sustained
//!   failure and snaps back to baseline after a success
//! - **Bounded History**: fixed-capacity ring that trims from the oldest entry
//! - **Health Monitor**: score and status classification from fault counters
//!
//! The async engines in the `kiosk-display` crate own the clocks and I/O and
//! feed these structures with observations.
//!
//! # Architecture
//!
//! ```text
//!   fetch outcome ──► AdaptiveCadence ──► next interval / retry decision
//!
//!   fault counters ─► HealthMonitor ────► score + status (+ critical reasons)
//!
//!   samples ────────► BoundedHistory ───► last 50 entries for the health panel
//! ```
//!
//! # Example
//!
//! ```
//! use kiosk_core_resilience::{AdaptiveCadence, CadenceConfig};
//! use std::time::Duration;
//!
//! let mut cadence = AdaptiveCadence::new(CadenceConfig::default());
//! for _ in 0..5 {
//!     cadence.record_failure();
//! }
//! assert_eq!(cadence.interval(), Duration::from_secs(60));
//!
//! cadence.record_success();
//! assert_eq!(cadence.interval(), Duration::from_secs(30));
//! ```

pub mod cadence;
pub mod error;
pub mod health_monitor;
pub mod history;

// Re-export main types for convenience
pub use cadence::{AdaptiveCadence, CadenceConfig, FailureDecision};
pub use error::ResilienceError;
pub use health_monitor::{
    CriticalReason, HealthAssessment, HealthCounters, HealthMonitor, HealthMonitorStats,
    HealthSample, HealthStatus, HealthThresholds,
};
pub use history::{BoundedHistory, HistoryStats, DEFAULT_HISTORY_CAPACITY};

/// Prelude module for convenient imports
pub mod prelude {
    pub use super::cadence::{AdaptiveCadence, CadenceConfig, FailureDecision};
    pub use super::error::ResilienceError;
    pub use super::health_monitor::{
        HealthAssessment, HealthCounters, HealthMonitor, HealthSample, HealthStatus,
        HealthThresholds,
    };
    pub use super::history::BoundedHistory;
}
