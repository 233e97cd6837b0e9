//! Per-target probe orchestration
//!
//! Runs one target's probes strictly in sequence, stopping at the first
//! conclusive proof. Transport failures and timeouts never abort a target:
//! they count as inconclusive and the escalation moves on. Only cancellation
//! and hard failures (see [`ScanError::is_hard_failure`]) end a scan early.

use crate::error::{ScanError, ScanResult};
use crate::probe::{EvasionVariant, ProbeOptions, ProbeOutcome, ProbeStrategy, Prober};
use crate::target::Target;
use crate::version::{classify, Classification};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Which strategies a job runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPolicy {
    /// Exactly one strategy, no escalation
    Single(ProbeStrategy),
    /// Escalate through every strategy until a conclusive signal
    Comprehensive,
}

impl ScanPolicy {
    /// Upper bound on probes one job can issue
    pub fn max_probes(&self) -> u32 {
        match self {
            ScanPolicy::Single(_) => 1,
            ScanPolicy::Comprehensive => ProbeStrategy::ESCALATION.len() as u32,
        }
    }
}

impl fmt::Display for ScanPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanPolicy::Single(strategy) => write!(f, "{}", strategy),
            ScanPolicy::Comprehensive => f.write_str("comprehensive"),
        }
    }
}

/// Final per-target classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanVerdict {
    pub target: Target,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vulnerable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Classifier justification when the verdict came from a version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub strategy_used: ProbeStrategy,
    pub filter_suspected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evasion_applied: Option<EvasionVariant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub evidence: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ScanVerdict {
    fn from_outcome(target: &Target, strategy: ProbeStrategy, outcome: ProbeOutcome) -> Self {
        Self {
            target: target.clone(),
            vulnerable: if outcome.conclusive { outcome.vulnerable } else { None },
            version: outcome.detected_version,
            reason: None,
            strategy_used: strategy,
            filter_suspected: outcome.filter_suspected,
            evasion_applied: strategy.evasion(),
            status_code: outcome.status_code,
            evidence: outcome.evidence,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Verdict for a job that produced no usable outcome
    pub fn failed(target: &Target, strategy: ProbeStrategy, error: &ScanError) -> Self {
        Self {
            target: target.clone(),
            vulnerable: None,
            version: None,
            reason: None,
            strategy_used: strategy,
            filter_suspected: false,
            evasion_applied: None,
            status_code: None,
            evidence: String::new(),
            error: Some(error.to_string()),
            timestamp: Utc::now(),
        }
    }

    /// Verdict for a version found without probing, e.g. in a lockfile
    pub fn classified(target: &Target, version: &str, evidence: impl Into<String>) -> Self {
        let outcome = ProbeOutcome::inconclusive()
            .with_version(version)
            .with_evidence(evidence)
            .sanitized();
        Self::from_outcome(target, ProbeStrategy::PassiveVersion, outcome)
            .with_classification(&classify(version))
    }

    fn with_classification(mut self, classification: &Classification) -> Self {
        self.vulnerable = classification.verdict();
        self.reason = Some(classification.reason.clone());
        self
    }

    pub fn is_vulnerable(&self) -> bool {
        self.vulnerable == Some(true)
    }

    /// Neither confirmed vulnerable nor confirmed safe
    pub fn is_undetermined(&self) -> bool {
        self.vulnerable.is_none() && self.error.is_none()
    }
}

/// One probe run: the outcome, plus the error that made it inconclusive
struct Attempt {
    strategy: ProbeStrategy,
    outcome: ProbeOutcome,
    error: Option<ScanError>,
}

impl Attempt {
    fn into_verdict(self, target: &Target) -> ScanVerdict {
        let mut verdict = ScanVerdict::from_outcome(target, self.strategy, self.outcome);
        verdict.error = self.error.map(|e| e.to_string());
        verdict
    }
}

/// Drives the probe decision tree for one target at a time
#[derive(Clone)]
pub struct ScanOrchestrator {
    prober: Arc<dyn Prober>,
}

impl ScanOrchestrator {
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        Self { prober }
    }

    pub fn prober_name(&self) -> &str {
        self.prober.name()
    }

    /// Reject a policy the prober cannot carry out. Comprehensive scans are
    /// always accepted since unsupported steps only come back inconclusive.
    pub fn check_policy(&self, policy: ScanPolicy) -> ScanResult<()> {
        match policy {
            ScanPolicy::Single(strategy) if !self.prober.supports(strategy) => {
                Err(ScanError::ConfigError(format!(
                    "{} prober does not support the {} strategy",
                    self.prober.name(),
                    strategy
                )))
            }
            _ => Ok(()),
        }
    }

    /// Scan one target. Fails when `cancel` fires mid-scan or a probe reports
    /// a hard failure such as a misconfiguration.
    pub async fn run(
        &self,
        target: &Target,
        policy: ScanPolicy,
        options: &ProbeOptions,
        cancel: &CancellationToken,
    ) -> ScanResult<ScanVerdict> {
        match policy {
            ScanPolicy::Single(strategy) => self.run_single(target, strategy, options, cancel).await,
            ScanPolicy::Comprehensive => self.run_comprehensive(target, options, cancel).await,
        }
    }

    async fn run_single(
        &self,
        target: &Target,
        strategy: ProbeStrategy,
        options: &ProbeOptions,
        cancel: &CancellationToken,
    ) -> ScanResult<ScanVerdict> {
        let attempt = self.attempt(target, strategy, options, cancel).await?;
        let verdict = attempt.into_verdict(target);

        if strategy == ProbeStrategy::PassiveVersion {
            if let Some(version) = verdict.version.clone() {
                return Ok(verdict.with_classification(&classify(&version)));
            }
        }
        Ok(verdict)
    }

    async fn run_comprehensive(
        &self,
        target: &Target,
        options: &ProbeOptions,
        cancel: &CancellationToken,
    ) -> ScanResult<ScanVerdict> {
        let passive = self
            .attempt(target, ProbeStrategy::PassiveVersion, options, cancel)
            .await?;
        let version = passive.outcome.detected_version.clone();
        let mut filter_seen = passive.outcome.filter_suspected;

        if let Some(version) = &version {
            let provisional = classify(version);
            log::debug!("{}: version {} provisionally {}", target, version, provisional.reason);
        }

        let direct = self
            .attempt(target, ProbeStrategy::NonDestructive, options, cancel)
            .await?;
        filter_seen |= direct.outcome.filter_suspected;

        if direct.outcome.is_confirmed_vulnerable() {
            log::info!("{}: confirmed vulnerable by non-destructive probe", target);
            let mut verdict = direct.into_verdict(target);
            verdict.version = version.or(verdict.version);
            return Ok(verdict);
        }

        if direct.outcome.filter_suspected {
            log::debug!("{}: filter suspected, escalating to active probes", target);
            for strategy in ProbeStrategy::ESCALATION.iter().filter(|s| s.is_active()) {
                let attempt = self.attempt(target, *strategy, options, cancel).await?;
                filter_seen |= attempt.outcome.filter_suspected;

                if attempt.outcome.is_confirmed_vulnerable() {
                    log::info!("{}: confirmed vulnerable by {} probe", target, strategy);
                    let mut verdict = attempt.into_verdict(target);
                    verdict.version = version.or(verdict.version);
                    verdict.filter_suspected = filter_seen;
                    return Ok(verdict);
                }
            }
        }

        if let Some(version) = version {
            let classification = classify(&version);
            let mut verdict = passive.into_verdict(target).with_classification(&classification);
            verdict.version = Some(version);
            verdict.filter_suspected = filter_seen;
            // a filter can hide a true positive but never creates one
            if filter_seen && verdict.vulnerable == Some(true) {
                verdict.vulnerable = Some(false);
                verdict.reason = Some(format!(
                    "{} (suppressed: filter suspected)",
                    classification.reason
                ));
            }
            return Ok(verdict);
        }

        Ok(direct.into_verdict(target))
    }

    /// Run one probe under its own deadline. Cancellation and hard failures
    /// are errors; every other probe failure comes back as an inconclusive
    /// attempt.
    async fn attempt(
        &self,
        target: &Target,
        strategy: ProbeStrategy,
        options: &ProbeOptions,
        cancel: &CancellationToken,
    ) -> ScanResult<Attempt> {
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        log::debug!("{}: running {} probe", target, strategy);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ScanError::Cancelled),
            res = tokio::time::timeout(options.timeout, self.prober.probe(target, strategy, options)) => {
                match res {
                    Ok(inner) => inner,
                    Err(_) => Err(ScanError::ProbeTimeout(options.timeout)),
                }
            }
        };

        Ok(match result {
            Ok(outcome) => Attempt {
                strategy,
                outcome: outcome.sanitized(),
                error: None,
            },
            // only the token cancels the scan
            Err(ScanError::Cancelled) if cancel.is_cancelled() => return Err(ScanError::Cancelled),
            Err(e) if e.is_hard_failure() => {
                log::warn!("{}: {} probe failed: {}", target, strategy, e);
                return Err(e);
            }
            Err(e) => {
                log::debug!("{}: {} probe inconclusive: {}", target, strategy, e);
                Attempt {
                    strategy,
                    outcome: ProbeOutcome::inconclusive(),
                    error: Some(e),
                }
            }
        })
    }
}

impl fmt::Debug for ScanOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanOrchestrator")
            .field("prober", &self.prober.name())
            .finish()
    }
}
