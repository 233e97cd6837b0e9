//! Bounded-concurrency worker pool for scan jobs
//!
//! A single dispatcher task pulls jobs off a bounded queue, waits for a slot
//! on the concurrency semaphore and spawns one task per admitted job. Every
//! accepted job yields exactly one [`JobResult`]: a verdict, a timeout, a
//! cancellation or a caught panic.

use super::orchestrator::{ScanOrchestrator, ScanPolicy, ScanVerdict};
use crate::error::{ScanError, ScanResult};
use crate::probe::{ProbeOptions, ProbeStrategy};
use crate::target::Target;
use futures::{FutureExt, Stream};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Upper bound for the concurrency budget
pub const MAX_WORKERS: usize = 4096;

/// Slack added on top of the probe deadlines of a job
pub const JOB_GRACE: Duration = Duration::from_secs(5);

/// One target to scan with its strategy policy and options
#[derive(Debug, Clone)]
pub struct ScanJob {
    pub target: Target,
    pub policy: ScanPolicy,
    pub options: ProbeOptions,
}

impl ScanJob {
    pub fn new(target: Target, policy: ScanPolicy, options: ProbeOptions) -> Self {
        Self {
            target,
            policy,
            options,
        }
    }

    /// Whole-job deadline: every probe the policy may issue, plus grace
    pub fn deadline(&self) -> Duration {
        self.options
            .timeout
            .saturating_mul(self.policy.max_probes())
            .saturating_add(JOB_GRACE)
    }

    fn first_strategy(&self) -> ProbeStrategy {
        match self.policy {
            ScanPolicy::Single(strategy) => strategy,
            ScanPolicy::Comprehensive => ProbeStrategy::PassiveVersion,
        }
    }
}

/// Outcome of one submitted job
#[derive(Debug)]
pub struct JobResult {
    pub verdict: ScanVerdict,
    /// Pool-level failure (timeout, cancellation, panic); mirrored in `verdict.error`
    pub error: Option<ScanError>,
}

impl JobResult {
    fn failed(job: &ScanJob, error: ScanError) -> Self {
        Self {
            verdict: ScanVerdict::failed(&job.target, job.first_strategy(), &error),
            error: Some(error),
        }
    }

    pub fn target(&self) -> &Target {
        &self.verdict.target
    }

    pub fn is_vulnerable(&self) -> bool {
        self.verdict.is_vulnerable()
    }
}

/// Results in completion order. Ends once the pool is closed or drained.
#[derive(Debug)]
pub struct ResultStream {
    rx: mpsc::UnboundedReceiver<JobResult>,
}

impl ResultStream {
    pub async fn next(&mut self) -> Option<JobResult> {
        self.rx.recv().await
    }
}

impl Stream for ResultStream {
    type Item = JobResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Admits queued jobs onto the semaphore and spawns them
struct Dispatcher {
    orchestrator: Arc<ScanOrchestrator>,
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    results: mpsc::UnboundedSender<JobResult>,
    active: Arc<AtomicUsize>,
}

impl Dispatcher {
    async fn run(self, mut jobs: mpsc::Receiver<ScanJob>) {
        loop {
            let job = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let permit = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    self.reject(&job, ScanError::Cancelled);
                    break;
                }
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        self.reject(&job, ScanError::PoolClosed);
                        break;
                    }
                },
            };

            self.spawn_job(job, permit);
        }

        // no job accepted by submit may vanish: fail whatever is still queued
        jobs.close();
        while let Some(job) = jobs.recv().await {
            self.reject(&job, ScanError::Cancelled);
        }
        log::debug!("dispatcher stopped");
    }

    fn reject(&self, job: &ScanJob, error: ScanError) {
        log::debug!("{}: not started: {}", job.target, error);
        let _ = self.results.send(JobResult::failed(job, error));
    }

    fn spawn_job(&self, job: ScanJob, permit: OwnedSemaphorePermit) {
        let orchestrator = self.orchestrator.clone();
        let shutdown = self.shutdown.clone();
        let results = self.results.clone();
        let active = self.active.clone();

        self.tracker.spawn(async move {
            // released on every exit path, panics included
            let _permit = permit;
            active.fetch_add(1, Ordering::SeqCst);
            let result = execute(&orchestrator, &job, job.deadline(), &shutdown).await;
            active.fetch_sub(1, Ordering::SeqCst);

            if results.send(result).is_err() {
                log::debug!("{}: result dropped, receiver gone", job.target);
            }
        });
    }
}

async fn execute(
    orchestrator: &ScanOrchestrator,
    job: &ScanJob,
    deadline: Duration,
    shutdown: &CancellationToken,
) -> JobResult {
    let run = AssertUnwindSafe(orchestrator.run(&job.target, job.policy, &job.options, shutdown))
        .catch_unwind();

    let outcome = tokio::select! {
        biased;
        _ = shutdown.cancelled() => Err(ScanError::Cancelled),
        res = tokio::time::timeout(deadline, run) => match res {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => {
                let msg = panic_message(&*panic);
                log::error!("{}: scan job panicked: {}", job.target, msg);
                Err(ScanError::JobPanicked(msg))
            }
            Err(_) => {
                log::warn!("{}: scan job exceeded {:?}", job.target, deadline);
                Err(ScanError::ProbeTimeout(deadline))
            }
        },
    };

    match outcome {
        Ok(verdict) => JobResult {
            verdict,
            error: None,
        },
        Err(e) => JobResult::failed(job, e),
    }
}

/// Semaphore-gated pool running scan jobs concurrently
pub struct WorkerPool {
    budget: usize,
    shutdown: CancellationToken,
    closed: AtomicBool,
    active: Arc<AtomicUsize>,
    tracker: TaskTracker,
    jobs: Mutex<Option<mpsc::Sender<ScanJob>>>,
    results_tx: Mutex<Option<mpsc::UnboundedSender<JobResult>>>,
    results_rx: Mutex<Option<mpsc::UnboundedReceiver<JobResult>>>,
    dispatcher: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start a pool. The budget is clamped into `[1, MAX_WORKERS]`.
    /// Must be called from within a tokio runtime.
    pub fn start(orchestrator: Arc<ScanOrchestrator>, budget: usize) -> Self {
        let budget = budget.clamp(1, MAX_WORKERS);
        let (job_tx, job_rx) = mpsc::channel(budget.saturating_mul(2));
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let active = Arc::new(AtomicUsize::new(0));

        let dispatcher = Dispatcher {
            orchestrator,
            semaphore: Arc::new(Semaphore::new(budget)),
            shutdown: shutdown.clone(),
            tracker: tracker.clone(),
            results: results_tx.clone(),
            active: active.clone(),
        };
        let handle = tokio::spawn(dispatcher.run(job_rx));
        log::debug!("worker pool started with budget {}", budget);

        Self {
            budget,
            shutdown,
            closed: AtomicBool::new(false),
            active,
            tracker,
            jobs: Mutex::new(Some(job_tx)),
            results_tx: Mutex::new(Some(results_tx)),
            results_rx: Mutex::new(Some(results_rx)),
            dispatcher: tokio::sync::Mutex::new(Some(handle)),
        }
    }

    /// Effective concurrency budget after clamping
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Jobs currently executing
    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Queue a job. Waits while the queue is full, but returns
    /// [`ScanError::PoolClosed`] as soon as shutdown begins.
    pub async fn submit(&self, job: ScanJob) -> ScanResult<()> {
        if self.is_closed() {
            return Err(ScanError::PoolClosed);
        }
        let sender = lock(&self.jobs).clone().ok_or(ScanError::PoolClosed)?;

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(ScanError::PoolClosed),
            res = sender.send(job) => res.map_err(|_| ScanError::PoolClosed),
        }
    }

    /// Take the result stream. Only the first call returns `Some`.
    pub fn results(&self) -> Option<ResultStream> {
        lock(&self.results_rx).take().map(|rx| ResultStream { rx })
    }

    /// Cancel in-flight jobs, refuse new ones and wait for every admitted job
    /// to report. The result stream ends afterwards. Safe to call repeatedly.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown.cancel();
        lock(&self.jobs).take();
        self.finish().await;
    }

    /// Refuse new jobs but let everything already queued run to completion,
    /// then end the result stream.
    pub async fn drain(&self) {
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.jobs).take();
        self.finish().await;
    }

    async fn finish(&self) {
        let mut dispatcher = self.dispatcher.lock().await;
        if let Some(handle) = dispatcher.take() {
            if let Err(e) = handle.await {
                log::error!("dispatcher task failed: {}", e);
            }
        }
        self.tracker.close();
        self.tracker.wait().await;
        lock(&self.results_tx).take();
        log::debug!("worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("budget", &self.budget)
            .field("active", &self.active_jobs())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{EvasionVariant, Platform, ProbeOutcome, Prober};
    use async_trait::async_trait;

    /// Never answers, whatever the per-request timeout says
    struct Stalled;

    #[async_trait]
    impl Prober for Stalled {
        async fn probe_version(&self, _: &Target, _: &ProbeOptions) -> ScanResult<ProbeOutcome> {
            std::future::pending().await
        }

        async fn probe_non_destructive(
            &self,
            _: &Target,
            _: &ProbeOptions,
        ) -> ScanResult<ProbeOutcome> {
            std::future::pending().await
        }

        async fn probe_active(
            &self,
            _: &Target,
            _: Option<EvasionVariant>,
            _: Platform,
            _: &ProbeOptions,
        ) -> ScanResult<ProbeOutcome> {
            std::future::pending().await
        }

        fn name(&self) -> &str {
            "stalled"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_deadline_expiry_reports_timeout() {
        let orchestrator = ScanOrchestrator::new(Arc::new(Stalled));
        let job = ScanJob::new(
            Target::parse("example.com").unwrap(),
            ScanPolicy::Comprehensive,
            ProbeOptions::default().with_timeout(Duration::from_secs(3600)),
        );
        let deadline = Duration::from_millis(100);

        let result = execute(&orchestrator, &job, deadline, &CancellationToken::new()).await;

        match result.error {
            Some(ScanError::ProbeTimeout(d)) => assert_eq!(d, deadline),
            other => panic!("expected ProbeTimeout, got {:?}", other),
        }
        assert!(result.verdict.vulnerable.is_none());
        assert!(result.verdict.error.is_some());
    }

    #[test]
    fn test_deadline_scales_with_policy() {
        let target = Target::parse("example.com").unwrap();
        let options = ProbeOptions::default().with_timeout(Duration::from_secs(2));

        let single = ScanJob::new(
            target.clone(),
            ScanPolicy::Single(ProbeStrategy::NonDestructive),
            options.clone(),
        );
        assert_eq!(single.deadline(), Duration::from_secs(2) + JOB_GRACE);

        let full = ScanJob::new(target, ScanPolicy::Comprehensive, options);
        assert_eq!(full.deadline(), Duration::from_secs(12) + JOB_GRACE);
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(&*payload), "owned boom");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(&*payload), "unknown panic");
    }

    #[test]
    fn test_failed_result_mirrors_error() {
        let job = ScanJob::new(
            Target::parse("example.com").unwrap(),
            ScanPolicy::Comprehensive,
            ProbeOptions::default(),
        );
        let result = JobResult::failed(&job, ScanError::Cancelled);
        assert!(result.verdict.vulnerable.is_none());
        assert_eq!(result.verdict.error.as_deref(), Some("Scan cancelled"));
        assert_eq!(result.verdict.strategy_used, ProbeStrategy::PassiveVersion);
        assert!(!result.verdict.is_undetermined());
    }
}
