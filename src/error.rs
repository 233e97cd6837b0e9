//! Error handling for the rscscan scanner
//!
//! Probe and transport failures are absorbed by the orchestrator and turned
//! into inconclusive outcomes. Only pool-level and malformed-input errors
//! reach the caller as hard failures.

use std::time::Duration;
use thiserror::Error;

/// Main error type for scanning operations
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Worker pool is closed")]
    PoolClosed,

    #[error("Probe timed out after {0:?}")]
    ProbeTimeout(Duration),

    #[error("Transport error: {0}")]
    ProbeTransportError(String),

    #[error("Scan cancelled")]
    Cancelled,

    #[error("Scan job panicked: {0}")]
    JobPanicked(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type alias for scan operations
pub type ScanResult<T> = Result<T, ScanError>;

impl ScanError {
    /// Errors that fail the whole target instead of being folded into an
    /// inconclusive probe result.
    pub fn is_hard_failure(&self) -> bool {
        matches!(
            self,
            ScanError::PoolClosed | ScanError::InvalidTarget(_) | ScanError::ConfigError(_)
        )
    }
}

impl From<reqwest::Error> for ScanError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not expose the configured deadline on the error
            ScanError::ProbeTimeout(Duration::ZERO)
        } else {
            ScanError::ProbeTransportError(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(ScanError::PoolClosed.is_hard_failure());
        assert!(ScanError::InvalidTarget("".into()).is_hard_failure());
        assert!(!ScanError::Cancelled.is_hard_failure());
        assert!(ScanError::ConfigError("bad proxy".into()).is_hard_failure());
        assert!(!ScanError::ProbeTransportError("reset".into()).is_hard_failure());
        assert!(!ScanError::ProbeTimeout(Duration::from_secs(1)).is_hard_failure());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(ScanError::PoolClosed.to_string(), "Worker pool is closed");
        assert_eq!(
            ScanError::InvalidTarget("ftp://".into()).to_string(),
            "Invalid target: ftp://"
        );
    }
}
