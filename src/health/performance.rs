//! Long tasks, layout shifts and largest-contentful-paint tracking

use kiosk_core_interface::RuntimeSignal;
use serde::Serialize;

/// Long tasks at or above this duration count as slow operations
pub const SLOW_TASK_MS: f64 = 100.0;

/// Long-task durations at or above this are discarded as measurement noise
pub const MAX_TASK_MS: f64 = 60_000.0;

/// LCP entries at or above this are discarded as measurement noise
pub const MAX_LCP_MS: f64 = 30_000.0;

/// LCP above this is a slow operation
pub const SLOW_LCP_MS: f64 = 4_000.0;

/// Cumulative layout shift above this is a slow operation (reported once)
pub const POOR_CLS: f64 = 0.25;

/// Single layout-shift values above this are discarded
const MAX_SHIFT: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PerformanceKind {
    LongTask,
    LayoutShift,
    LargestContentfulPaint,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceEntry {
    pub kind: PerformanceKind,
    /// Milliseconds for tasks and paints, unitless score for shifts
    pub value: f64,
    pub at_ms: u64,
}

/// Result of feeding one runtime signal to the tracker
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub entry: PerformanceEntry,
    /// Set when the entry counts as a slow operation
    pub slow: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    pub long_tasks: u32,
    pub slow_tasks: u32,
    pub cumulative_layout_shift: f64,
    pub last_lcp_ms: Option<f64>,
    pub discarded: u32,
}

#[derive(Debug, Default)]
pub struct PerformanceTracker {
    summary: PerformanceSummary,
    cls_reported: bool,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and record a performance signal.
    ///
    /// Returns `None` for non-performance signals and for entries outside
    /// the validation bounds.
    pub fn observe(&mut self, signal: &RuntimeSignal, at_ms: u64) -> Option<Observation> {
        match *signal {
            RuntimeSignal::LongTask { duration_ms } => {
                if !(duration_ms > 0.0 && duration_ms < MAX_TASK_MS) {
                    self.summary.discarded += 1;
                    return None;
                }
                self.summary.long_tasks += 1;
                let slow = (duration_ms >= SLOW_TASK_MS).then(|| {
                    self.summary.slow_tasks += 1;
                    format!("long task blocked the main thread for {:.0} ms", duration_ms)
                });
                Some(Observation {
                    entry: entry(PerformanceKind::LongTask, duration_ms, at_ms),
                    slow,
                })
            }
            RuntimeSignal::LayoutShift {
                value,
                had_recent_input,
            } => {
                if had_recent_input {
                    return None;
                }
                if !(0.0..=MAX_SHIFT).contains(&value) {
                    self.summary.discarded += 1;
                    return None;
                }
                self.summary.cumulative_layout_shift += value;
                let cls = self.summary.cumulative_layout_shift;
                let slow = (cls > POOR_CLS && !self.cls_reported).then(|| {
                    self.cls_reported = true;
                    format!("cumulative layout shift reached {:.3}", cls)
                });
                Some(Observation {
                    entry: entry(PerformanceKind::LayoutShift, value, at_ms),
                    slow,
                })
            }
            RuntimeSignal::LargestContentfulPaint { render_time_ms } => {
                if !(render_time_ms > 0.0 && render_time_ms < MAX_LCP_MS) {
                    self.summary.discarded += 1;
                    return None;
                }
                self.summary.last_lcp_ms = Some(render_time_ms);
                let slow = (render_time_ms > SLOW_LCP_MS)
                    .then(|| format!("largest contentful paint took {:.0} ms", render_time_ms));
                Some(Observation {
                    entry: entry(PerformanceKind::LargestContentfulPaint, render_time_ms, at_ms),
                    slow,
                })
            }
            _ => None,
        }
    }

    pub fn summary(&self) -> PerformanceSummary {
        self.summary
    }

    /// Forget accumulated layout shift after a document reload or recovery
    pub fn reset_layout_shift(&mut self) {
        self.summary.cumulative_layout_shift = 0.0;
        self.cls_reported = false;
    }
}

fn entry(kind: PerformanceKind, value: f64, at_ms: u64) -> PerformanceEntry {
    PerformanceEntry { kind, value, at_ms }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_tasks() {
        let mut tracker = PerformanceTracker::new();
        let quick = tracker
            .observe(&RuntimeSignal::LongTask { duration_ms: 60.0 }, 1)
            .unwrap();
        assert!(quick.slow.is_none());

        let slow = tracker
            .observe(&RuntimeSignal::LongTask { duration_ms: 250.0 }, 2)
            .unwrap();
        assert!(slow.slow.is_some());
        assert_eq!(slow.entry.kind, PerformanceKind::LongTask);

        assert!(tracker
            .observe(&RuntimeSignal::LongTask { duration_ms: 90_000.0 }, 3)
            .is_none());

        let summary = tracker.summary();
        assert_eq!(summary.long_tasks, 2);
        assert_eq!(summary.slow_tasks, 1);
        assert_eq!(summary.discarded, 1);
    }

    #[test]
    fn test_lcp_noise_ignored() {
        let mut tracker = PerformanceTracker::new();
        assert!(tracker
            .observe(
                &RuntimeSignal::LargestContentfulPaint {
                    render_time_ms: 30_000.0
                },
                1
            )
            .is_none());
        assert_eq!(tracker.summary().last_lcp_ms, None);

        let observed = tracker
            .observe(
                &RuntimeSignal::LargestContentfulPaint {
                    render_time_ms: 5_200.0,
                },
                2,
            )
            .unwrap();
        assert!(observed.slow.is_some());
        assert_eq!(tracker.summary().last_lcp_ms, Some(5_200.0));
    }

    #[test]
    fn test_layout_shift_reported_once() {
        let mut tracker = PerformanceTracker::new();
        let shift = |value| RuntimeSignal::LayoutShift {
            value,
            had_recent_input: false,
        };

        assert!(tracker.observe(&shift(0.2), 1).unwrap().slow.is_none());
        assert!(tracker.observe(&shift(0.1), 2).unwrap().slow.is_some());
        assert!(tracker.observe(&shift(0.1), 3).unwrap().slow.is_none());

        let user_driven = RuntimeSignal::LayoutShift {
            value: 3.0,
            had_recent_input: true,
        };
        assert!(tracker.observe(&user_driven, 4).is_none());
        assert!((tracker.summary().cumulative_layout_shift - 0.4).abs() < 1e-9);

        tracker.reset_layout_shift();
        assert!(tracker.observe(&shift(0.3), 5).unwrap().slow.is_some());
    }

    #[test]
    fn test_fault_signals_are_not_performance() {
        let mut tracker = PerformanceTracker::new();
        let signal = RuntimeSignal::UnhandledRejection {
            reason: "boom".into(),
        };
        assert!(tracker.observe(&signal, 1).is_none());
    }
}
