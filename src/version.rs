//! Version-range vulnerability classification
//!
//! Maps a detected framework version string to a verdict. Rules are checked
//! most-specific first: an exact (major, minor) patch threshold, then a
//! major-only rule, then the pre-release (canary) rules. Versions are always
//! compared numerically.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static VERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+)\.(\d+)\.(\d+)(?:-canary\.(\d+))?$").expect("version regex is valid")
});

/// Reason reported for versions that cannot be parsed.
pub const UNDETERMINED: &str = "undetermined";

/// First patched patch release per (major, minor) line.
const PATCHED_VERSIONS: &[(u32, u32, u32)] = &[
    (15, 0, 5),
    (15, 1, 9),
    (15, 2, 6),
    (15, 3, 6),
    (15, 4, 8),
    (15, 5, 7),
    (16, 0, 7),
];

/// Verdict for a major line without an exact minor entry.
const MAJOR_RULES: &[(u32, bool)] = &[
    // 15.x lines without a backported fix
    (15, true),
    // every 16.x after 16.0 shipped with the fix
    (16, false),
];

/// Canary builds of 14.3.0 starting with this sequence number carry the vulnerable code.
const CANARY_14_3_0_FIRST_VULNERABLE: u32 = 77;

/// Parsed `MAJOR.MINOR.PATCH[-canary.N]` version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    /// Canary sequence number, present only for pre-release builds
    pub canary: Option<u32>,
}

impl VersionInfo {
    /// Parse a version string, tolerating surrounding whitespace and a leading `v`.
    pub fn parse(version: &str) -> Option<Self> {
        let version = version.trim();
        let version = version.strip_prefix('v').unwrap_or(version);
        let caps = VERSION_RE.captures(version)?;

        let number = |idx: usize| caps.get(idx).and_then(|m| m.as_str().parse::<u32>().ok());

        Some(Self {
            major: number(1)?,
            minor: number(2)?,
            patch: number(3)?,
            canary: match caps.get(4) {
                Some(m) => Some(m.as_str().parse().ok()?),
                None => None,
            },
        })
    }

    pub fn is_canary(&self) -> bool {
        self.canary.is_some()
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(seq) = self.canary {
            write!(f, "-canary.{}", seq)?;
        }
        Ok(())
    }
}

/// Outcome category of a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Vulnerable,
    Patched,
    NotAffected,
    /// Not enough evidence; distinct from "confirmed safe"
    Undetermined,
}

/// Verdict and justification for one version string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub status: VersionStatus,
    pub reason: String,
}

impl Classification {
    fn new(status: VersionStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }

    pub fn is_vulnerable(&self) -> bool {
        self.status == VersionStatus::Vulnerable
    }

    pub fn is_determined(&self) -> bool {
        self.status != VersionStatus::Undetermined
    }

    /// Tri-state verdict: `None` when the version could not be judged.
    pub fn verdict(&self) -> Option<bool> {
        self.is_determined().then(|| self.is_vulnerable())
    }
}

/// Classify a version string. Total: never panics, never reports an
/// unparseable version as vulnerable.
pub fn classify(version: &str) -> Classification {
    match VersionInfo::parse(version) {
        Some(info) => classify_info(&info),
        None => Classification::new(VersionStatus::Undetermined, UNDETERMINED),
    }
}

/// Classify an already parsed version.
pub fn classify_info(info: &VersionInfo) -> Classification {
    if let Some(&(_, _, fixed)) = PATCHED_VERSIONS
        .iter()
        .find(|(major, minor, _)| *major == info.major && *minor == info.minor)
    {
        return if info.patch >= fixed {
            Classification::new(
                VersionStatus::Patched,
                format!("patched in {}.{}.{}+", info.major, info.minor, fixed),
            )
        } else {
            Classification::new(
                VersionStatus::Vulnerable,
                format!(
                    "{}.{}.x below {}.{}.{} is vulnerable",
                    info.major, info.minor, info.major, info.minor, fixed
                ),
            )
        };
    }

    if let Some(&(_, vulnerable)) = MAJOR_RULES.iter().find(|(major, _)| *major == info.major) {
        return if vulnerable {
            Classification::new(
                VersionStatus::Vulnerable,
                format!("{}.{} has no patched release", info.major, info.minor),
            )
        } else {
            Classification::new(
                VersionStatus::Patched,
                format!("{}.x above {}.0 is patched", info.major, info.major),
            )
        };
    }

    if let Some(seq) = info.canary {
        return classify_canary(info, seq);
    }

    Classification::new(VersionStatus::NotAffected, "version not affected")
}

fn classify_canary(info: &VersionInfo, seq: u32) -> Classification {
    if info.major != 14 {
        return Classification::new(VersionStatus::NotAffected, "canary line not affected");
    }

    match (info.minor, info.patch) {
        (minor, _) if minor > 3 => {
            Classification::new(VersionStatus::Vulnerable, "14.x canary above 14.3 is vulnerable")
        }
        (3, 0) if seq >= CANARY_14_3_0_FIRST_VULNERABLE => Classification::new(
            VersionStatus::Vulnerable,
            format!("14.3.0-canary.{}+ is vulnerable", CANARY_14_3_0_FIRST_VULNERABLE),
        ),
        (3, patch) if patch > 0 => {
            Classification::new(VersionStatus::Vulnerable, "14.3.x canary is vulnerable")
        }
        _ => Classification::new(VersionStatus::NotAffected, "pre-vulnerability canary"),
    }
}
