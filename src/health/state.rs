//! Health state snapshots

use kiosk_core_interface::HealthSummary;
use kiosk_core_resilience::{HealthCounters, HealthStatus, HistoryStats};
use serde::Serialize;

use super::fault::FaultEvent;
use super::memory::MemorySample;
use super::performance::{PerformanceEntry, PerformanceSummary};
use super::recovery::RecoveryStats;

/// Point-in-time health of the kiosk process
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthState {
    /// Epoch milliseconds at supervisor creation
    pub start_time: u64,
    pub uptime_ms: u64,
    pub status: HealthStatus,
    pub score: f64,
    pub counters: HealthCounters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<FaultEvent>,
}

impl HealthState {
    pub fn summary(&self, memory_usage_pct: Option<f64>) -> HealthSummary {
        HealthSummary {
            status: self.status,
            score: self.score,
            uptime_ms: self.uptime_ms,
            system_errors: self.counters.system_errors,
            network_errors: self.counters.network_errors,
            memory_usage_pct,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySizes {
    pub memory: HistoryStats,
    pub performance: HistoryStats,
    pub errors: HistoryStats,
}

/// Everything the on-demand health panel shows
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub state: HealthState,
    pub memory: Vec<MemorySample>,
    pub performance: Vec<PerformanceEntry>,
    pub performance_summary: PerformanceSummary,
    pub recent_faults: Vec<FaultEvent>,
    pub histories: HistorySizes,
    pub recovery: RecoveryStats,
}

impl HealthReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
