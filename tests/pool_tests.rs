//! Worker pool concurrency, shutdown and fault isolation

mod common;

use common::{as_prober, options, target, Reply, StubProber};
use rscscan::error::ScanError;
use rscscan::probe::{ProbeOutcome, ProbeStrategy};
use rscscan::scanner::{JobResult, ScanJob, ScanOrchestrator, ScanPolicy, WorkerPool};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const PASSIVE: ScanPolicy = ScanPolicy::Single(ProbeStrategy::PassiveVersion);

fn pool(stub: &Arc<StubProber>, budget: usize) -> WorkerPool {
    WorkerPool::start(Arc::new(ScanOrchestrator::new(as_prober(stub))), budget)
}

fn job(host: &str) -> ScanJob {
    ScanJob::new(target(host), PASSIVE, options())
}

async fn collect(mut stream: rscscan::scanner::ResultStream) -> Vec<JobResult> {
    let mut results = Vec::new();
    while let Some(result) = stream.next().await {
        results.push(result);
    }
    results
}

#[tokio::test]
async fn test_budget_is_never_exceeded() {
    let stub = Arc::new(
        StubProber::new(|_, _| Reply::Outcome(ProbeOutcome::not_vulnerable()))
            .with_delay(Duration::from_millis(10)),
    );
    let pool = pool(&stub, 4);
    let stream = pool.results().unwrap();

    for i in 0..40 {
        pool.submit(job(&format!("host{}.example.com", i))).await.unwrap();
    }
    pool.drain().await;
    let results = collect(stream).await;

    assert_eq!(results.len(), 40);
    assert!(stub.max_in_flight() <= 4);
    assert!(stub.max_in_flight() >= 2);
    assert!(results.iter().all(|r| r.error.is_none()));
    assert_eq!(pool.active_jobs(), 0);
}

#[tokio::test]
async fn test_budget_is_clamped() {
    let stub = Arc::new(StubProber::hanging());
    assert_eq!(pool(&stub, 0).budget(), 1);
    assert_eq!(pool(&stub, usize::MAX).budget(), rscscan::scanner::MAX_WORKERS);
}

#[tokio::test]
async fn test_close_cancels_hung_jobs_with_one_result_each() {
    let stub = Arc::new(StubProber::hanging());
    let pool = pool(&stub, 2);
    let stream = pool.results().unwrap();

    let hosts: Vec<String> = (0..6).map(|i| format!("host{}.example.com", i)).collect();
    for host in &hosts {
        let job = ScanJob::new(target(host), PASSIVE, options().with_timeout(Duration::from_secs(60)));
        pool.submit(job).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    tokio::time::timeout(Duration::from_secs(5), pool.close())
        .await
        .expect("close should not wait on hung probes");
    let results = collect(stream).await;

    assert_eq!(results.len(), hosts.len());
    let seen: HashSet<String> = results.iter().map(|r| r.target().to_string()).collect();
    assert_eq!(seen.len(), hosts.len());
    for result in &results {
        assert!(matches!(result.error, Some(ScanError::Cancelled)));
        assert_eq!(result.verdict.vulnerable, None);
    }
    assert!(stub.max_in_flight() <= 2);
}

#[tokio::test]
async fn test_submit_after_close_is_rejected() {
    let stub = Arc::new(StubProber::hanging());
    let pool = pool(&stub, 1);
    pool.close().await;

    let result = tokio::time::timeout(Duration::from_secs(1), pool.submit(job("example.com")))
        .await
        .expect("submit after close must not block");
    assert!(matches!(result, Err(ScanError::PoolClosed)));
    assert!(pool.is_closed());

    // closing twice is harmless
    pool.close().await;
}

#[tokio::test]
async fn test_close_releases_blocked_submitter() {
    let stub = Arc::new(StubProber::hanging());
    // one running, one awaiting a slot, two queued: the queue is full
    let pool = Arc::new(pool(&stub, 1));
    let stream = pool.results().unwrap();

    for i in 0..4 {
        let job = ScanJob::new(
            target(&format!("host{}.example.com", i)),
            PASSIVE,
            options().with_timeout(Duration::from_secs(60)),
        );
        pool.submit(job).await.unwrap();
    }

    let submitter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.submit(job("blocked.example.com")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!submitter.is_finished(), "fifth submit should wait for queue space");

    tokio::time::timeout(Duration::from_secs(5), pool.close())
        .await
        .expect("close should not wait on hung jobs");
    let blocked = tokio::time::timeout(Duration::from_secs(5), submitter)
        .await
        .expect("close must release the blocked submitter")
        .unwrap();
    assert!(matches!(blocked, Err(ScanError::PoolClosed)));

    let results = collect(stream).await;
    assert_eq!(results.len(), 4);
    assert!(results
        .iter()
        .all(|r| matches!(r.error, Some(ScanError::Cancelled))));
    assert!(results.iter().all(|r| !r.target().as_str().contains("blocked")));
}

#[tokio::test]
async fn test_panic_is_isolated_to_its_job() {
    let stub = Arc::new(StubProber::new(|target, _| {
        if target.as_str().contains("boom") {
            Reply::Panic("prober exploded".to_string())
        } else {
            Reply::Outcome(ProbeOutcome::inconclusive().with_version("15.1.9"))
        }
    }));
    // a single slot proves the panicking job released its permit
    let pool = pool(&stub, 1);
    let stream = pool.results().unwrap();

    pool.submit(job("boom.example.com")).await.unwrap();
    pool.submit(job("a.example.com")).await.unwrap();
    pool.submit(job("b.example.com")).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), pool.drain())
        .await
        .expect("pool should keep running after a panic");
    let results = collect(stream).await;

    assert_eq!(results.len(), 3);
    let crashed = results
        .iter()
        .find(|r| r.target().as_str().contains("boom"))
        .unwrap();
    match &crashed.error {
        Some(ScanError::JobPanicked(msg)) => assert!(msg.contains("prober exploded")),
        other => panic!("expected JobPanicked, got {:?}", other),
    }
    let healthy: Vec<_> = results.iter().filter(|r| r.error.is_none()).collect();
    assert_eq!(healthy.len(), 2);
    assert!(healthy.iter().all(|r| r.verdict.vulnerable == Some(false)));
}

#[tokio::test]
async fn test_drain_runs_queued_jobs_to_completion() {
    let stub = Arc::new(
        StubProber::new(|_, _| Reply::Outcome(ProbeOutcome::vulnerable()))
            .with_delay(Duration::from_millis(5)),
    );
    let pool = pool(&stub, 2);
    let stream = pool.results().unwrap();

    for i in 0..5 {
        pool.submit(job(&format!("host{}.example.com", i))).await.unwrap();
    }
    pool.drain().await;
    let results = collect(stream).await;

    assert_eq!(results.len(), 5);
    assert!(results.iter().all(JobResult::is_vulnerable));
    assert!(matches!(
        pool.submit(job("late.example.com")).await,
        Err(ScanError::PoolClosed)
    ));
}

#[tokio::test]
async fn test_results_can_only_be_taken_once() {
    let stub = Arc::new(StubProber::hanging());
    let pool = pool(&stub, 1);
    assert!(pool.results().is_some());
    assert!(pool.results().is_none());
}
