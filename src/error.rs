/*!
 * Error types for the kiosk engines
 */

use std::fmt;
use std::io;

use kiosk_core_interface::InterfaceError;
use kiosk_core_resilience::ResilienceError;

pub type Result<T> = std::result::Result<T, KioskError>;

#[derive(Debug)]
pub enum KioskError {
    /// Configuration could not be loaded or failed validation
    Config(String),

    /// Display descriptor is unusable (empty slug, empty source URL)
    InvalidDisplay(String),

    /// Fault tag outside the closed kind set
    UnknownFaultKind(String),

    /// Fit mode outside the closed mode set
    UnknownFitMode(String),

    /// An adapter reported a failure
    Adapter(InterfaceError),

    /// Persisting `lastSync` or reading the config file failed
    Io(io::Error),

    /// The component was torn down
    TornDown(&'static str),
}

impl KioskError {
    /// Check if this error came from the network path
    pub fn is_network_error(&self) -> bool {
        match self {
            KioskError::Adapter(err) => err.is_network(),
            _ => false,
        }
    }

    /// Check if retrying the same call can succeed
    pub fn is_transient(&self) -> bool {
        match self {
            KioskError::Adapter(err) => err.is_network() || matches!(err, InterfaceError::Aborted),
            KioskError::Io(io_err) => matches!(
                io_err.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            KioskError::Config(_) => ErrorCategory::Configuration,
            KioskError::InvalidDisplay(_)
            | KioskError::UnknownFaultKind(_)
            | KioskError::UnknownFitMode(_) => ErrorCategory::Validation,
            KioskError::Adapter(err) if err.is_network() => ErrorCategory::Network,
            KioskError::Adapter(InterfaceError::Storage(_)) | KioskError::Io(_) => {
                ErrorCategory::Storage
            }
            KioskError::Adapter(_) => ErrorCategory::Host,
            KioskError::TornDown(_) => ErrorCategory::Lifecycle,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Configuration errors
    Configuration,
    /// Rejected input tags and descriptors
    Validation,
    /// Fetch and HTTP errors
    Network,
    /// Durable storage errors
    Storage,
    /// Embedded document and runtime adapter errors
    Host,
    /// Use after teardown
    Lifecycle,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Storage => write!(f, "storage"),
            ErrorCategory::Host => write!(f, "host"),
            ErrorCategory::Lifecycle => write!(f, "lifecycle"),
        }
    }
}

impl fmt::Display for KioskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KioskError::Config(msg) => write!(f, "Configuration error: {}", msg),
            KioskError::InvalidDisplay(msg) => write!(f, "Invalid display: {}", msg),
            KioskError::UnknownFaultKind(kind) => write!(f, "Unknown fault kind: {}", kind),
            KioskError::UnknownFitMode(mode) => write!(f, "Unknown fit mode: {}", mode),
            KioskError::Adapter(err) => write!(f, "Adapter error: {}", err),
            KioskError::Io(err) => write!(f, "I/O error: {}", err),
            KioskError::TornDown(component) => write!(f, "{} has been torn down", component),
        }
    }
}

impl std::error::Error for KioskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KioskError::Adapter(err) => Some(err),
            KioskError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for KioskError {
    fn from(err: io::Error) -> Self {
        KioskError::Io(err)
    }
}

impl From<InterfaceError> for KioskError {
    fn from(err: InterfaceError) -> Self {
        KioskError::Adapter(err)
    }
}

impl From<ResilienceError> for KioskError {
    fn from(err: ResilienceError) -> Self {
        KioskError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for KioskError {
    fn from(err: toml::de::Error) -> Self {
        KioskError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<serde_json::Error> for KioskError {
    fn from(err: serde_json::Error) -> Self {
        KioskError::Adapter(InterfaceError::Storage(format!("JSON error: {}", err)))
    }
}
