//! Fault taxonomy
//!
//! Every fault carries a closed [`FaultKind`]; the kind alone decides its
//! [`FaultSeverity`]. Free-form tags from outside the crate go through
//! [`FaultKind::from_str`], which rejects anything unknown.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::KioskError;

/// How a fault weighs on the health score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultSeverity {
    /// Counts against `systemErrors`
    System,
    /// Counts against `networkErrors`
    Network,
    /// Logged only
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Javascript,
    UnhandledPromise,
    Resource,
    HealthCheck,
    MemoryCheck,
    PerformanceCheck,
    MemoryWarning,
    Performance,
    ScaleHandler,
    DisplayManager,
    Initialization,
    RefreshService,
    FetchError,
    NetworkTimeout,
    IframeLoadTimeout,
    IframeError,
    IframeMaxRetries,
    IframeAccessDenied,
    ScaleMeasureError,
}

impl FaultKind {
    pub const ALL: [FaultKind; 19] = [
        FaultKind::Javascript,
        FaultKind::UnhandledPromise,
        FaultKind::Resource,
        FaultKind::HealthCheck,
        FaultKind::MemoryCheck,
        FaultKind::PerformanceCheck,
        FaultKind::MemoryWarning,
        FaultKind::Performance,
        FaultKind::ScaleHandler,
        FaultKind::DisplayManager,
        FaultKind::Initialization,
        FaultKind::RefreshService,
        FaultKind::FetchError,
        FaultKind::NetworkTimeout,
        FaultKind::IframeLoadTimeout,
        FaultKind::IframeError,
        FaultKind::IframeMaxRetries,
        FaultKind::IframeAccessDenied,
        FaultKind::ScaleMeasureError,
    ];

    pub fn severity(&self) -> FaultSeverity {
        match self {
            FaultKind::RefreshService
            | FaultKind::FetchError
            | FaultKind::NetworkTimeout
            | FaultKind::IframeLoadTimeout
            | FaultKind::IframeError
            | FaultKind::IframeMaxRetries => FaultSeverity::Network,
            FaultKind::IframeAccessDenied | FaultKind::ScaleMeasureError => FaultSeverity::Info,
            _ => FaultSeverity::System,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::Javascript => "javascript",
            FaultKind::UnhandledPromise => "unhandled_promise",
            FaultKind::Resource => "resource",
            FaultKind::HealthCheck => "health_check",
            FaultKind::MemoryCheck => "memory_check",
            FaultKind::PerformanceCheck => "performance_check",
            FaultKind::MemoryWarning => "memory_warning",
            FaultKind::Performance => "performance",
            FaultKind::ScaleHandler => "scale_handler",
            FaultKind::DisplayManager => "display_manager",
            FaultKind::Initialization => "initialization",
            FaultKind::RefreshService => "refresh_service",
            FaultKind::FetchError => "fetch_error",
            FaultKind::NetworkTimeout => "network_timeout",
            FaultKind::IframeLoadTimeout => "iframe_load_timeout",
            FaultKind::IframeError => "iframe_error",
            FaultKind::IframeMaxRetries => "iframe_max_retries",
            FaultKind::IframeAccessDenied => "iframe_access_denied",
            FaultKind::ScaleMeasureError => "scale_measure_error",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultKind {
    type Err = KioskError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        FaultKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == tag)
            .ok_or_else(|| KioskError::UnknownFaultKind(tag.to_string()))
    }
}

/// One recorded fault
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultEvent {
    pub kind: FaultKind,
    pub message: String,
    pub source_component: String,
    /// Epoch milliseconds
    pub timestamp: u64,
    pub severity: FaultSeverity,
}

impl FaultEvent {
    pub fn new(
        kind: FaultKind,
        message: impl Into<String>,
        source_component: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source_component: source_component.into(),
            timestamp,
            severity: kind.severity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_classes() {
        let network: Vec<_> = FaultKind::ALL
            .iter()
            .filter(|k| k.severity() == FaultSeverity::Network)
            .collect();
        let info: Vec<_> = FaultKind::ALL
            .iter()
            .filter(|k| k.severity() == FaultSeverity::Info)
            .collect();

        assert_eq!(network.len(), 6);
        assert_eq!(info.len(), 2);
        assert_eq!(FaultKind::Javascript.severity(), FaultSeverity::System);
        assert_eq!(FaultKind::MemoryWarning.severity(), FaultSeverity::System);
        assert_eq!(FaultKind::IframeMaxRetries.severity(), FaultSeverity::Network);
    }

    #[test]
    fn test_tags_match_serde_names() {
        for kind in FaultKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            assert_eq!(kind.as_str().parse::<FaultKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let err = "cosmic_ray".parse::<FaultKind>().unwrap_err();
        assert!(matches!(err, KioskError::UnknownFaultKind(ref tag) if tag == "cosmic_ray"));
    }

    #[test]
    fn test_event_takes_severity_from_kind() {
        let event = FaultEvent::new(FaultKind::FetchError, "reset", "refresh", 5);
        assert_eq!(event.severity, FaultSeverity::Network);
        assert_eq!(event.source_component, "refresh");
    }
}
