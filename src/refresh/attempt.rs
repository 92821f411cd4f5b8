//! Refresh attempts and their bookkeeping

use serde::Serialize;
use std::fmt;

/// What started an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trigger {
    Initial,
    Poll,
    Retry,
    Forced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttemptOutcome {
    Success,
    /// Superseded, force-refreshed or torn down; never a fault
    Cancelled,
    /// The watchdog fired before the response arrived
    AbortedTimeout,
    HttpError,
    NetworkError,
}

impl AttemptOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            AttemptOutcome::AbortedTimeout | AttemptOutcome::HttpError | AttemptOutcome::NetworkError
        )
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Cancelled => "cancelled",
            AttemptOutcome::AbortedTimeout => "aborted-timeout",
            AttemptOutcome::HttpError => "http-error",
            AttemptOutcome::NetworkError => "network-error",
        };
        f.write_str(text)
    }
}

/// A finished attempt as kept in the attempt log
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshAttempt {
    pub id: u64,
    /// Epoch milliseconds; also the `t` cache-buster value
    pub started_at: u64,
    pub url: String,
    pub trigger: Trigger,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub changed: bool,
    pub duration_ms: u64,
}

/// Running totals per outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeTotals {
    pub success: u64,
    pub cancelled: u64,
    pub aborted_timeout: u64,
    pub http_error: u64,
    pub network_error: u64,
}

impl OutcomeTotals {
    pub fn record(&mut self, outcome: AttemptOutcome) {
        match outcome {
            AttemptOutcome::Success => self.success += 1,
            AttemptOutcome::Cancelled => self.cancelled += 1,
            AttemptOutcome::AbortedTimeout => self.aborted_timeout += 1,
            AttemptOutcome::HttpError => self.http_error += 1,
            AttemptOutcome::NetworkError => self.network_error += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.success + self.cancelled + self.aborted_timeout + self.http_error + self.network_error
    }

    pub fn failures(&self) -> u64 {
        self.aborted_timeout + self.http_error + self.network_error
    }
}

/// Diagnostics snapshot of a refresh engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshStats {
    pub interval_ms: u64,
    pub baseline_ms: u64,
    pub consecutive_errors: u32,
    pub retry_count: u32,
    pub totals: OutcomeTotals,
    pub changes_detected: u64,
    pub last_success_at: Option<u64>,
    pub last_change_at: Option<u64>,
    pub fingerprint: Option<String>,
    pub refreshing: bool,
    pub paused: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals() {
        let mut totals = OutcomeTotals::default();
        for outcome in [
            AttemptOutcome::Success,
            AttemptOutcome::Success,
            AttemptOutcome::Cancelled,
            AttemptOutcome::HttpError,
            AttemptOutcome::AbortedTimeout,
        ] {
            totals.record(outcome);
        }
        assert_eq!(totals.total(), 5);
        assert_eq!(totals.failures(), 2);
        assert_eq!(totals.success, 2);
    }

    #[test]
    fn test_outcome_names() {
        assert_eq!(AttemptOutcome::AbortedTimeout.to_string(), "aborted-timeout");
        assert_eq!(
            serde_json::to_string(&AttemptOutcome::NetworkError).unwrap(),
            "\"network-error\""
        );
        assert!(!AttemptOutcome::Cancelled.is_failure());
    }
}
