//! Memory sampling and the warning ladder

use kiosk_core_interface::{MemoryBreakdown, MemorySampler, Result};
use serde::Serialize;

const MIB: f64 = 1024.0 * 1024.0;

/// Which runtime API produced a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MemoryApi {
    Detailed,
    Heap,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySample {
    pub used_mb: f64,
    pub limit_mb: f64,
    pub usage_percent: f64,
    pub api: MemoryApi,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<Vec<MemoryBreakdown>>,
    /// Epoch milliseconds
    pub at_ms: u64,
}

impl MemorySample {
    fn from_bytes(used: u64, limit: u64, api: MemoryApi, at_ms: u64) -> Self {
        let usage_percent = if limit == 0 {
            0.0
        } else {
            used as f64 / limit as f64 * 100.0
        };
        Self {
            used_mb: used as f64 / MIB,
            limit_mb: limit as f64 / MIB,
            usage_percent,
            api,
            breakdown: None,
            at_ms,
        }
    }
}

/// Take one sample: the detailed API when supported, else the basic heap.
///
/// `Ok(None)` means the runtime exposes no memory API at all.
pub async fn sample(sampler: &dyn MemorySampler, at_ms: u64) -> Result<Option<MemorySample>> {
    if sampler.supports_detailed() {
        let detailed = sampler.measure_detailed().await?;
        let mut sample = MemorySample::from_bytes(
            detailed.bytes,
            detailed.limit_bytes,
            MemoryApi::Detailed,
            at_ms,
        );
        sample.breakdown = Some(detailed.breakdown);
        return Ok(Some(sample));
    }

    Ok(sampler.heap().map(|heap| {
        MemorySample::from_bytes(heap.used_bytes, heap.limit_bytes, MemoryApi::Heap, at_ms)
    }))
}

/// What a memory check should do with a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryVerdict {
    /// Usage at or below the threshold
    Normal,
    /// Above the threshold with `warnings` still within the limit
    Warning { warnings: u32 },
    /// Warnings exceeded the limit
    Recover { warnings: u32 },
}

/// Advance the warning ladder for one reading; `warnings` is the count
/// before this reading
pub fn evaluate(
    usage_percent: f64,
    threshold_percent: f64,
    warnings: u32,
    limit: u32,
) -> MemoryVerdict {
    if usage_percent <= threshold_percent {
        return MemoryVerdict::Normal;
    }
    let warnings = warnings.saturating_add(1);
    if warnings <= limit {
        MemoryVerdict::Warning { warnings }
    } else {
        MemoryVerdict::Recover { warnings }
    }
}

/// Whether the post-grace re-sample still calls for a reload
pub fn needs_reload(
    resample_percent: Option<f64>,
    threshold_percent: f64,
    warnings: u32,
    limit: u32,
) -> bool {
    let still_high = resample_percent.is_some_and(|pct| pct > threshold_percent);
    still_high || warnings > limit.saturating_mul(2)
}
