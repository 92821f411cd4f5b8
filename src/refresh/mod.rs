//! Refresh engine: cache-busted polling with change detection

pub mod attempt;
mod engine;
pub mod url;

pub use attempt::{AttemptOutcome, OutcomeTotals, RefreshAttempt, RefreshStats, Trigger};
pub use engine::{Navigator, RefreshEngine, LAST_SYNC_KEY};
