//! Output formatting and management

use crate::scanner::{JobResult, ScanSummary, ScanVerdict};
use colored::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

/// Output format options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub colored: bool,
    pub verbose: bool,
    /// Print only vulnerable targets
    pub quiet: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            colored: true,
            verbose: false,
            quiet: false,
        }
    }
}

/// Serialized report written by [`save_results`]
#[derive(Debug, Serialize, Deserialize)]
pub struct ScanReport {
    pub summary: ScanSummary,
    pub results: Vec<ScanVerdict>,
}

/// Renders verdicts to the console
pub struct OutputManager {
    config: OutputConfig,
}

impl OutputManager {
    pub fn new(config: OutputConfig) -> Self {
        if !config.colored {
            colored::control::set_override(false);
        }
        Self { config }
    }

    /// Whether a verdict should be shown at all
    pub fn should_print(&self, verdict: &ScanVerdict) -> bool {
        !self.config.quiet || verdict.is_vulnerable()
    }

    /// Render one verdict in the configured format
    pub fn format_verdict(&self, verdict: &ScanVerdict) -> io::Result<String> {
        match self.config.format {
            OutputFormat::Text => Ok(self.format_text(verdict)),
            OutputFormat::Json => serde_json::to_string(verdict)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
        }
    }

    /// Print one verdict to stdout, honouring quiet mode
    pub fn print_verdict(&self, verdict: &ScanVerdict) -> io::Result<()> {
        if !self.should_print(verdict) {
            return Ok(());
        }
        let line = self.format_verdict(verdict)?;
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", line)
    }

    fn format_text(&self, verdict: &ScanVerdict) -> String {
        let status = match (verdict.vulnerable, &verdict.error) {
            (Some(true), _) => "[VULNERABLE]".bright_red().bold(),
            (Some(false), _) => "[NOT VULNERABLE]".bright_green(),
            (None, Some(_)) => "[ERROR]".bright_yellow(),
            (None, None) => "[UNKNOWN]".bright_yellow(),
        };

        let mut line = format!("{} {}", status, verdict.target.to_string().bright_white());
        if let Some(code) = verdict.status_code {
            line.push_str(&format!(" - Status: {}", code));
        }
        if let Some(version) = &verdict.version {
            line.push_str(&format!(" - Version: {}", version.bright_cyan()));
        }
        if verdict.filter_suspected {
            line.push_str(&format!(" {}", "[filter]".bright_magenta()));
        }
        if let Some(variant) = verdict.evasion_applied {
            line.push_str(&format!(" (bypass: {})", variant));
        }

        if self.config.verbose {
            line.push_str(&format!("\n    strategy: {}", verdict.strategy_used));
            if let Some(reason) = &verdict.reason {
                line.push_str(&format!("\n    reason: {}", reason));
            }
            if !verdict.evidence.is_empty() {
                line.push_str(&format!("\n    evidence: {}", verdict.evidence.dimmed()));
            }
        }
        if let Some(error) = &verdict.error {
            line.push_str(&format!("\n    error: {}", error));
        }

        line
    }

    /// Print the end-of-scan summary
    pub fn print_summary(&self, summary: &ScanSummary) {
        if self.config.format == OutputFormat::Json {
            return;
        }

        println!();
        println!("{}", "=".repeat(60).bright_blue());
        println!("{}", "SCAN SUMMARY".bright_white().bold());
        println!("{}", "=".repeat(60).bright_blue());
        println!("  Total targets scanned: {}", summary.total);
        if summary.vulnerable > 0 {
            println!(
                "  {}",
                format!("Vulnerable: {}", summary.vulnerable).bright_red().bold()
            );
        } else {
            println!("  Vulnerable: {}", summary.vulnerable);
        }
        println!("  Not vulnerable: {}", summary.not_vulnerable);
        println!("  Undetermined: {}", summary.undetermined);
        println!("  Errors: {}", summary.errors);
        if summary.filtered > 0 {
            println!("  Filter suspected: {}", summary.filtered);
        }
        println!(
            "  Duration: {:.2}s ({:.1} targets/s)",
            summary.duration.as_secs_f64(),
            summary.scan_rate()
        );
        println!("{}", "=".repeat(60).bright_blue());
    }
}

/// Write a JSON report. With `vulnerable_only` only positive verdicts are kept.
pub fn save_results<P: AsRef<Path>>(
    path: P,
    results: &[JobResult],
    summary: &ScanSummary,
    vulnerable_only: bool,
) -> io::Result<usize> {
    let verdicts: Vec<ScanVerdict> = results
        .iter()
        .filter(|r| !vulnerable_only || r.is_vulnerable())
        .map(|r| r.verdict.clone())
        .collect();
    let count = verdicts.len();

    let report = ScanReport {
        summary: summary.clone(),
        results: verdicts,
    };

    let file = File::create(path.as_ref())?;
    serde_json::to_writer_pretty(file, &report)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    log::info!("Saved {} results to {}", count, path.as_ref().display());

    Ok(count)
}
