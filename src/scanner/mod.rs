//! Scanner module: per-target orchestration and the concurrent worker pool

pub mod orchestrator;
pub mod pool;

use crate::error::{ScanError, ScanResult};
use crate::probe::ProbeOptions;
use crate::target::Target;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use orchestrator::{ScanOrchestrator, ScanPolicy, ScanVerdict};
pub use pool::{JobResult, ResultStream, ScanJob, WorkerPool, MAX_WORKERS};

/// Aggregate counts over a finished scan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Targets that produced a result
    pub total: usize,

    /// Targets confirmed or classified vulnerable
    pub vulnerable: usize,

    /// Targets confirmed or classified not vulnerable
    pub not_vulnerable: usize,

    /// Targets without enough evidence either way
    pub undetermined: usize,

    /// Targets whose scan failed
    pub errors: usize,

    /// Targets where a defensive filter was suspected
    pub filtered: usize,

    /// Total scan duration
    pub duration: Duration,
}

impl ScanSummary {
    pub fn from_results(results: &[JobResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            summary.record(&result.verdict);
        }
        summary
    }

    /// Count one verdict
    pub fn record(&mut self, verdict: &ScanVerdict) {
        self.total += 1;
        if verdict.filter_suspected {
            self.filtered += 1;
        }
        match (verdict.vulnerable, &verdict.error) {
            (Some(true), _) => self.vulnerable += 1,
            (Some(false), _) => self.not_vulnerable += 1,
            (None, Some(_)) => self.errors += 1,
            (None, None) => self.undetermined += 1,
        }
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration = duration;
    }

    /// Targets per second
    pub fn scan_rate(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.total as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Process exit status: 1 when anything is vulnerable
    pub fn exit_code(&self) -> i32 {
        if self.vulnerable > 0 {
            1
        } else {
            0
        }
    }
}

/// Scan every target through a fresh pool and collect all results.
pub async fn scan_targets(
    orchestrator: Arc<ScanOrchestrator>,
    targets: Vec<Target>,
    policy: ScanPolicy,
    options: ProbeOptions,
    workers: usize,
) -> ScanResult<Vec<JobResult>> {
    scan_targets_with(orchestrator, targets, policy, options, workers, |_| {}).await
}

/// Like [`scan_targets`], calling `on_result` as each result arrives.
pub async fn scan_targets_with<F>(
    orchestrator: Arc<ScanOrchestrator>,
    targets: Vec<Target>,
    policy: ScanPolicy,
    options: ProbeOptions,
    workers: usize,
    mut on_result: F,
) -> ScanResult<Vec<JobResult>>
where
    F: FnMut(&JobResult),
{
    let start_time = Instant::now();
    let expected = targets.len();
    let pool = Arc::new(WorkerPool::start(orchestrator, workers));
    let mut stream = pool.results().ok_or(ScanError::PoolClosed)?;

    // the producer drains the pool once everything is queued, which ends the stream
    let producer = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let mut submitted = 0usize;
            for target in targets {
                let job = ScanJob::new(target, policy, options.clone());
                if let Err(e) = pool.submit(job).await {
                    log::warn!("Stopped submitting after {} jobs: {}", submitted, e);
                    break;
                }
                submitted += 1;
            }
            pool.drain().await;
            submitted
        })
    };

    let mut results = Vec::with_capacity(expected);
    while let Some(result) = stream.next().await {
        on_result(&result);
        results.push(result);
    }

    let submitted = producer
        .await
        .map_err(|e| ScanError::JobPanicked(format!("job producer failed: {}", e)))?;
    log::debug!(
        "Scanned {}/{} targets in {:?}",
        results.len(),
        submitted,
        start_time.elapsed()
    );

    Ok(results)
}
