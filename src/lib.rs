//! rscscan - concurrent React Server Components exposure scanner
//!
//! Fans scan jobs out over a bounded worker pool. Each job escalates from
//! passive version fingerprinting through intrusive probes and stops at the
//! first conclusive signal.

pub mod config;
pub mod error;
pub mod output;
pub mod probe;
pub mod scanner;
pub mod target;
pub mod utils;
pub mod version;

// Re-export commonly used types
pub use config::{ScanConfig, ScanMode};
pub use error::{ScanError, ScanResult};
pub use probe::{EvasionVariant, Platform, ProbeOptions, ProbeOutcome, ProbeStrategy, Prober};
pub use scanner::{
    scan_targets, scan_targets_with, JobResult, ScanJob, ScanOrchestrator, ScanPolicy,
    ScanSummary, ScanVerdict, WorkerPool,
};
pub use target::Target;
pub use version::{classify, Classification, VersionStatus};

pub type Result<T> = std::result::Result<T, ScanError>;
