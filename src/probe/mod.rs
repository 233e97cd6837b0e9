//! Probe strategies, options and the pluggable [`Prober`] capability
//!
//! The orchestrator never builds payloads or talks to the network itself; it
//! drives a [`Prober`] implementation through one entry point per strategy.

pub mod http;

use crate::error::ScanResult;
use crate::target::Target;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub use http::HttpProber;

/// Maximum evidence length kept from a probe response
pub const MAX_EVIDENCE_LEN: usize = 2000;

/// Evasion technique used by an active probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvasionVariant {
    /// Pad the request with junk data ahead of the payload
    Padding,
    /// Alternate (unicode escape) encoding of payload strings
    UnicodeEncoding,
    /// Bypass specific to a hosting platform's filter
    PlatformBypass,
}

impl EvasionVariant {
    /// Escalation order used in comprehensive mode
    pub const ESCALATION_ORDER: [EvasionVariant; 3] = [
        EvasionVariant::Padding,
        EvasionVariant::UnicodeEncoding,
        EvasionVariant::PlatformBypass,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EvasionVariant::Padding => "padding",
            EvasionVariant::UnicodeEncoding => "unicode_encoding",
            EvasionVariant::PlatformBypass => "platform_bypass",
        }
    }
}

impl fmt::Display for EvasionVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EvasionVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "padding" | "junk" | "waf-bypass" => Ok(EvasionVariant::Padding),
            "unicode" | "unicode_encoding" => Ok(EvasionVariant::UnicodeEncoding),
            "platform" | "platform_bypass" | "vercel" => Ok(EvasionVariant::PlatformBypass),
            _ => Err(format!("Unknown evasion variant: {}", s)),
        }
    }
}

/// A probing strategy, ordered by increasing intrusiveness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStrategy {
    PassiveVersion,
    NonDestructive,
    ActiveBaseline,
    ActiveEvasive(EvasionVariant),
}

impl ProbeStrategy {
    /// Full escalation sequence for comprehensive scans
    pub const ESCALATION: [ProbeStrategy; 6] = [
        ProbeStrategy::PassiveVersion,
        ProbeStrategy::NonDestructive,
        ProbeStrategy::ActiveBaseline,
        ProbeStrategy::ActiveEvasive(EvasionVariant::Padding),
        ProbeStrategy::ActiveEvasive(EvasionVariant::UnicodeEncoding),
        ProbeStrategy::ActiveEvasive(EvasionVariant::PlatformBypass),
    ];

    /// Position in the escalation sequence (0 is least intrusive)
    pub fn intrusiveness(&self) -> usize {
        Self::ESCALATION
            .iter()
            .position(|s| s == self)
            .unwrap_or(Self::ESCALATION.len())
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ProbeStrategy::ActiveBaseline | ProbeStrategy::ActiveEvasive(_))
    }

    pub fn evasion(&self) -> Option<EvasionVariant> {
        match self {
            ProbeStrategy::ActiveEvasive(variant) => Some(*variant),
            _ => None,
        }
    }

    /// Short label used in reports
    pub fn label(&self) -> String {
        match self {
            ProbeStrategy::PassiveVersion => "passive_version".to_string(),
            ProbeStrategy::NonDestructive => "non_destructive".to_string(),
            ProbeStrategy::ActiveBaseline => "active".to_string(),
            ProbeStrategy::ActiveEvasive(variant) => format!("active_{}", variant),
        }
    }
}

impl fmt::Display for ProbeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Target OS dialect for active probes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Unix,
    Windows,
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unix" | "linux" => Ok(Platform::Unix),
            "windows" | "win" => Ok(Platform::Windows),
            _ => Err(format!("Unknown platform: {}", s)),
        }
    }
}

/// Transport settings passed through untouched to the prober
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportOptions {
    pub proxy: Option<String>,
    pub verify_tls: bool,
    pub user_agent: String,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            proxy: None,
            verify_tls: false,
            user_agent: crate::config::DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Per-scan probe configuration. Never mutated once a scan starts; escalation
/// derives variant copies instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOptions {
    pub platform: Platform,
    /// Padding size in KB for the padding evasion
    pub evasion_size_kb: usize,
    /// Per-request deadline
    pub timeout: Duration,
    /// Evasion applied to this probe, set on variant copies
    pub evasion: Option<EvasionVariant>,
    pub transport: TransportOptions,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            platform: Platform::Unix,
            evasion_size_kb: 128,
            timeout: Duration::from_secs(10),
            evasion: None,
            transport: TransportOptions::default(),
        }
    }
}

impl ProbeOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Copy of these options with one evasion variant applied
    pub fn variant(&self, evasion: Option<EvasionVariant>) -> Self {
        Self {
            evasion,
            ..self.clone()
        }
    }
}

/// Result of a single prober invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    /// The probe reached a definitive determination
    pub conclusive: bool,
    /// Only meaningful when `conclusive` is true
    pub vulnerable: Option<bool>,
    pub detected_version: Option<String>,
    /// A defensive intermediary appears to have answered instead of the target
    pub filter_suspected: bool,
    pub evidence: String,
    pub status_code: Option<u16>,
}

impl ProbeOutcome {
    pub fn inconclusive() -> Self {
        Self::default()
    }

    pub fn vulnerable() -> Self {
        Self {
            conclusive: true,
            vulnerable: Some(true),
            ..Self::default()
        }
    }

    pub fn not_vulnerable() -> Self {
        Self {
            conclusive: true,
            vulnerable: Some(false),
            ..Self::default()
        }
    }

    /// A blocked probe: conclusive about the filter, silent about the target
    pub fn filtered() -> Self {
        Self {
            conclusive: true,
            filter_suspected: true,
            ..Self::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.detected_version = Some(version.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = evidence.into();
        self
    }

    pub fn is_confirmed_vulnerable(&self) -> bool {
        self.conclusive && self.vulnerable == Some(true)
    }

    /// Enforce the outcome invariants on data from an arbitrary prober.
    pub fn sanitized(mut self) -> Self {
        if !self.conclusive {
            self.vulnerable = None;
        }
        if self.is_confirmed_vulnerable() {
            self.filter_suspected = false;
        }
        truncate_evidence(&mut self.evidence);
        self
    }
}

fn truncate_evidence(evidence: &mut String) {
    if evidence.len() <= MAX_EVIDENCE_LEN {
        return;
    }
    let mut end = MAX_EVIDENCE_LEN;
    while !evidence.is_char_boundary(end) {
        end -= 1;
    }
    evidence.truncate(end);
}

/// Network probing capability consumed by the orchestrator.
///
/// Implementations must honour `options.timeout`, must never report
/// `vulnerable = Some(true)` without `conclusive`, and must set
/// `filter_suspected` when a response looks like a defensive intermediary.
/// Callers cancel a probe by dropping its future.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Passive fingerprinting of the deployed version
    async fn probe_version(&self, target: &Target, options: &ProbeOptions)
        -> ScanResult<ProbeOutcome>;

    /// Side-channel probe that executes nothing on the target
    async fn probe_non_destructive(
        &self,
        target: &Target,
        options: &ProbeOptions,
    ) -> ScanResult<ProbeOutcome>;

    /// Active proof-of-concept probe, optionally with an evasion variant
    async fn probe_active(
        &self,
        target: &Target,
        variant: Option<EvasionVariant>,
        platform: Platform,
        options: &ProbeOptions,
    ) -> ScanResult<ProbeOutcome>;

    /// Prober name
    fn name(&self) -> &str;

    /// Whether this prober implements `strategy`
    fn supports(&self, _strategy: ProbeStrategy) -> bool {
        true
    }

    /// Dispatch a strategy to its entry point
    async fn probe(
        &self,
        target: &Target,
        strategy: ProbeStrategy,
        options: &ProbeOptions,
    ) -> ScanResult<ProbeOutcome> {
        match strategy {
            ProbeStrategy::PassiveVersion => self.probe_version(target, options).await,
            ProbeStrategy::NonDestructive => self.probe_non_destructive(target, options).await,
            ProbeStrategy::ActiveBaseline => {
                self.probe_active(target, None, options.platform, &options.variant(None))
                    .await
            }
            ProbeStrategy::ActiveEvasive(variant) => {
                self.probe_active(
                    target,
                    Some(variant),
                    options.platform,
                    &options.variant(Some(variant)),
                )
                .await
            }
        }
    }
}
