//! Scan target normalization

use crate::error::{ScanError, ScanResult};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// A normalized scan target URL. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    /// Normalize and validate a raw target string.
    ///
    /// Bare hosts get an `https://` scheme and a single trailing slash is
    /// stripped, so `example.com/` and `https://example.com` are the same target.
    pub fn parse(raw: &str) -> ScanResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ScanError::InvalidTarget("target cannot be empty".to_string()));
        }

        let mut normalized = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("https://{}", trimmed)
        };
        if normalized.ends_with('/') {
            normalized.pop();
        }

        let url = Url::parse(&normalized)
            .map_err(|e| ScanError::InvalidTarget(format!("{}: {}", trimmed, e)))?;
        if url.host_str().map_or(true, str::is_empty) {
            return Err(ScanError::InvalidTarget(format!("{}: missing host", trimmed)));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Target for a file found by a local project scan, as a `file://` URL.
    /// Relative paths resolve against the working directory.
    pub fn from_path(path: &Path) -> ScanResult<Self> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        let url = Url::from_file_path(&absolute).map_err(|_| {
            ScanError::InvalidTarget(format!("{}: not a usable file path", path.display()))
        })?;
        Ok(Self(url.to_string()))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Target {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Target {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Target::parse(s)
    }
}
