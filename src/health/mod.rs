//! Health supervision: fault intake, scoring, memory and performance
//! monitoring, and recovery

pub mod fault;
pub mod memory;
pub mod performance;
pub mod recovery;
pub mod state;
mod supervisor;

pub use fault::{FaultEvent, FaultKind, FaultSeverity};
pub use memory::{MemoryApi, MemorySample};
pub use performance::{PerformanceEntry, PerformanceKind, PerformanceSummary};
pub use recovery::{RecoveryHookId, RecoveryStats, ReloadReason};
pub use state::{HealthReport, HealthState};
pub use supervisor::HealthSupervisor;
