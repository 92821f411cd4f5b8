//! Error types for the resilience primitives

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    /// A configuration value is out of its valid range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
