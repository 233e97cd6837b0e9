//! Scripted probers shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use rscscan::error::{ScanError, ScanResult};
use rscscan::probe::{EvasionVariant, Platform, ProbeOptions, ProbeOutcome, ProbeStrategy, Prober};
use rscscan::target::Target;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a stub probe does when called
#[derive(Debug, Clone)]
pub enum Reply {
    Outcome(ProbeOutcome),
    Fail(String),
    /// Reports cancellation without the token having fired
    Cancelled,
    Misconfigured(String),
    Hang,
    Panic(String),
}

/// One recorded probe call
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub target: String,
    pub strategy: ProbeStrategy,
    pub evasion: Option<EvasionVariant>,
    pub platform: Platform,
}

type Script = dyn Fn(&Target, ProbeStrategy) -> Reply + Send + Sync;

/// Prober driven by a closure, recording every call and peak concurrency
pub struct StubProber {
    script: Box<Script>,
    delay: Duration,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StubProber {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&Target, ProbeStrategy) -> Reply + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Fixed replies per strategy; anything unlisted is inconclusive
    pub fn scripted(replies: Vec<(ProbeStrategy, Reply)>) -> Self {
        Self::new(move |_, strategy| {
            replies
                .iter()
                .find(|(s, _)| *s == strategy)
                .map(|(_, reply)| reply.clone())
                .unwrap_or(Reply::Outcome(ProbeOutcome::inconclusive()))
        })
    }

    /// Every probe hangs until cancelled
    pub fn hanging() -> Self {
        Self::new(|_, _| Reply::Hang)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn strategies(&self) -> Vec<ProbeStrategy> {
        self.calls().into_iter().map(|c| c.strategy).collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn handle(
        &self,
        target: &Target,
        strategy: ProbeStrategy,
        options: &ProbeOptions,
    ) -> ScanResult<ProbeOutcome> {
        self.calls.lock().unwrap().push(Call {
            target: target.to_string(),
            strategy,
            evasion: options.evasion,
            platform: options.platform,
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match (self.script)(target, strategy) {
            Reply::Outcome(outcome) => Ok(outcome),
            Reply::Fail(msg) => Err(ScanError::ProbeTransportError(msg)),
            Reply::Cancelled => Err(ScanError::Cancelled),
            Reply::Misconfigured(msg) => Err(ScanError::ConfigError(msg)),
            Reply::Hang => std::future::pending().await,
            Reply::Panic(msg) => panic!("{}", msg),
        }
    }
}

#[async_trait]
impl Prober for StubProber {
    async fn probe_version(&self, target: &Target, options: &ProbeOptions) -> ScanResult<ProbeOutcome> {
        self.handle(target, ProbeStrategy::PassiveVersion, options).await
    }

    async fn probe_non_destructive(
        &self,
        target: &Target,
        options: &ProbeOptions,
    ) -> ScanResult<ProbeOutcome> {
        self.handle(target, ProbeStrategy::NonDestructive, options).await
    }

    async fn probe_active(
        &self,
        target: &Target,
        variant: Option<EvasionVariant>,
        _platform: Platform,
        options: &ProbeOptions,
    ) -> ScanResult<ProbeOutcome> {
        let strategy = match variant {
            Some(variant) => ProbeStrategy::ActiveEvasive(variant),
            None => ProbeStrategy::ActiveBaseline,
        };
        self.handle(target, strategy, options).await
    }

    fn name(&self) -> &str {
        "stub"
    }
}

pub fn target(host: &str) -> Target {
    Target::parse(host).unwrap()
}

pub fn options() -> ProbeOptions {
    ProbeOptions::default().with_timeout(Duration::from_secs(2))
}

pub fn as_prober(stub: &Arc<StubProber>) -> Arc<dyn Prober> {
    stub.clone()
}
