//! Configuration module for the rscscan scanner

use crate::probe::{EvasionVariant, Platform, ProbeOptions, ProbeStrategy, TransportOptions};
use crate::scanner::ScanPolicy;
use crate::scanner::pool::MAX_WORKERS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default user agent sent with every request
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Scan mode selected on the command line or in the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Passive version detection only
    Version,
    /// Non-destructive side-channel probe
    Safe,
    /// Active proof-of-concept probe
    Rce,
    /// Full escalation: version, side channel, then active probes
    Comprehensive,
}

impl std::str::FromStr for ScanMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "version" => Ok(ScanMode::Version),
            "safe" => Ok(ScanMode::Safe),
            "rce" | "active" => Ok(ScanMode::Rce),
            "comprehensive" | "full" => Ok(ScanMode::Comprehensive),
            _ => Err(format!("Unknown scan mode: {}", s)),
        }
    }
}

/// Main configuration structure for scanning operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Number of concurrent scan jobs
    pub workers: usize,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Target OS dialect for active probes
    pub platform: Platform,

    /// Padding size in KB for the padding evasion
    pub evasion_size_kb: usize,

    /// Verify TLS certificates
    pub verify_tls: bool,

    /// Proxy URL (http://host:port)
    pub proxy: Option<String>,

    /// User agent for all requests
    pub user_agent: String,

    /// Scan mode
    pub mode: ScanMode,

    /// Evasion applied to single-strategy active scans
    pub evasion: Option<EvasionVariant>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: 1000,
            timeout_secs: 10,
            platform: Platform::Unix,
            evasion_size_kb: 128,
            verify_tls: false,
            proxy: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            mode: ScanMode::Comprehensive,
            evasion: None,
        }
    }
}

impl ScanConfig {
    /// Set the number of workers
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Set the scan mode
    pub fn with_mode(mut self, mode: ScanMode) -> Self {
        self.mode = mode;
        self
    }

    /// Get timeout as Duration
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Load configuration from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            crate::ScanError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        toml::from_str(&content)
            .map_err(|e| crate::ScanError::ConfigError(format!("Failed to parse TOML: {}", e)))
    }

    /// Load configuration from `~/.rscscan.toml`, falling back to defaults
    pub fn load_default_config() -> Self {
        let Some(home_dir) = dirs::home_dir() else {
            return Self::default();
        };

        let config_path = home_dir.join(".rscscan.toml");
        if config_path.exists() {
            match Self::from_toml_file(&config_path) {
                Ok(config) => {
                    log::info!("Loaded config from {}", config_path.display());
                    return config;
                }
                Err(e) => log::warn!("Ignoring {}: {}", config_path.display(), e),
            }
        }

        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.workers == 0 {
            return Err(crate::ScanError::ConfigError(
                "Worker count must be greater than 0".to_string(),
            ));
        }

        if self.workers > MAX_WORKERS {
            log::warn!(
                "Worker count {} exceeds maximum, clamping to {}",
                self.workers,
                MAX_WORKERS
            );
        }

        if self.timeout_secs == 0 {
            return Err(crate::ScanError::ConfigError(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        if self.evasion_size_kb == 0 {
            return Err(crate::ScanError::ConfigError(
                "Evasion padding size must be greater than 0".to_string(),
            ));
        }

        if let Some(proxy) = &self.proxy {
            reqwest::Url::parse(proxy).map_err(|e| {
                crate::ScanError::ConfigError(format!("Invalid proxy URL {}: {}", proxy, e))
            })?;
        }

        Ok(())
    }

    /// Transport settings for the prober
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            proxy: self.proxy.clone(),
            verify_tls: self.verify_tls,
            user_agent: self.user_agent.clone(),
        }
    }

    /// Immutable per-scan probe options
    pub fn probe_options(&self) -> ProbeOptions {
        ProbeOptions {
            platform: self.platform,
            evasion_size_kb: self.evasion_size_kb,
            timeout: self.timeout_duration(),
            evasion: None,
            transport: self.transport_options(),
        }
    }

    /// Strategy selection policy for every job of this scan
    pub fn policy(&self) -> ScanPolicy {
        match self.mode {
            ScanMode::Version => ScanPolicy::Single(ProbeStrategy::PassiveVersion),
            ScanMode::Safe => ScanPolicy::Single(ProbeStrategy::NonDestructive),
            ScanMode::Rce => match self.evasion {
                Some(variant) => ScanPolicy::Single(ProbeStrategy::ActiveEvasive(variant)),
                None => ScanPolicy::Single(ProbeStrategy::ActiveBaseline),
            },
            ScanMode::Comprehensive => ScanPolicy::Comprehensive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = ScanConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.policy(), ScanPolicy::Comprehensive);
        assert_eq!(config.probe_options().timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_validation_errors() {
        assert!(ScanConfig::default().with_workers(0).validate().is_err());
        assert!(ScanConfig::default().with_timeout(0).validate().is_err());

        let config = ScanConfig {
            proxy: Some("not a url".to_string()),
            ..ScanConfig::default()
        };
        assert!(matches!(config.validate(), Err(crate::ScanError::ConfigError(_))));
    }

    #[test]
    fn test_rce_policy_with_evasion() {
        let config = ScanConfig {
            mode: ScanMode::Rce,
            evasion: Some(EvasionVariant::UnicodeEncoding),
            ..ScanConfig::default()
        };
        assert_eq!(
            config.policy(),
            ScanPolicy::Single(ProbeStrategy::ActiveEvasive(EvasionVariant::UnicodeEncoding))
        );
    }

    #[test]
    fn test_partial_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "workers = 50\nmode = \"safe\"\nplatform = \"windows\"").unwrap();

        let config = ScanConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.workers, 50);
        assert_eq!(config.mode, ScanMode::Safe);
        assert_eq!(config.platform, Platform::Windows);
        // unspecified fields keep their defaults
        assert_eq!(config.timeout_secs, 10);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let result = ScanConfig::from_toml_file("/nonexistent/rscscan.toml");
        assert!(matches!(result, Err(crate::ScanError::ConfigError(_))));
    }
}
