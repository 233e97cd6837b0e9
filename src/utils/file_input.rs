//! Reading scan targets from files
//!
//! Two formats are understood:
//! - Plain text with one target per line (`#` comments and blank lines skipped)
//! - A JSON array of target strings

use crate::target::Target;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Default cap on targets read from one file
pub const DEFAULT_MAX_TARGETS: usize = 1_000_000;

/// Supported target file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    PlainText,
    Json,
}

/// File input statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInputStats {
    pub total_lines: usize,
    pub valid_targets: usize,
    pub invalid_targets: usize,
    pub duplicates_removed: usize,
    pub file_format: FileFormat,
}

impl FileInputStats {
    fn new(file_format: FileFormat) -> Self {
        Self {
            total_lines: 0,
            valid_targets: 0,
            invalid_targets: 0,
            duplicates_removed: 0,
            file_format,
        }
    }
}

/// Loads and normalizes target lists
#[derive(Debug, Clone)]
pub struct FileInputHandler {
    max_targets: usize,
    deduplicate: bool,
}

impl Default for FileInputHandler {
    fn default() -> Self {
        Self {
            max_targets: DEFAULT_MAX_TARGETS,
            deduplicate: true,
        }
    }
}

impl FileInputHandler {
    pub fn new(max_targets: usize, deduplicate: bool) -> Self {
        Self {
            max_targets,
            deduplicate,
        }
    }

    /// Read targets from a file, detecting its format
    pub fn read_targets_from_file<P: AsRef<Path>>(
        &self,
        file_path: P,
    ) -> Result<(Vec<Target>, FileInputStats)> {
        let path = file_path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read target file: {:?}", path))?;
        let format = detect_format(path, &content);

        let entries: Vec<String> = match format {
            FileFormat::PlainText => content.lines().map(str::to_string).collect(),
            FileFormat::Json => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON target list: {:?}", path))?,
        };

        Ok(self.collect(entries, format))
    }

    fn collect(&self, entries: Vec<String>, format: FileFormat) -> (Vec<Target>, FileInputStats) {
        let mut targets = Vec::new();
        let mut seen = HashSet::new();
        let mut stats = FileInputStats::new(format);

        for entry in entries {
            stats.total_lines += 1;

            if targets.len() >= self.max_targets {
                log::warn!("Target limit of {} reached, ignoring the rest", self.max_targets);
                break;
            }

            let raw = entry.trim();
            if raw.is_empty() || raw.starts_with('#') {
                continue;
            }

            match Target::parse(raw) {
                Ok(target) => {
                    // dedupe on the normalized form so "a.com" and "https://a.com/" collapse
                    if self.deduplicate && !seen.insert(target.clone()) {
                        stats.duplicates_removed += 1;
                        continue;
                    }
                    targets.push(target);
                    stats.valid_targets += 1;
                }
                Err(e) => {
                    stats.invalid_targets += 1;
                    log::warn!("Skipping invalid target {:?}: {}", raw, e);
                }
            }
        }

        (targets, stats)
    }
}

fn detect_format(path: &Path, content: &str) -> FileFormat {
    let is_json_ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));

    if is_json_ext || content.trim_start().starts_with('[') {
        FileFormat::Json
    } else {
        FileFormat::PlainText
    }
}

/// Read a deduplicated target list from a file, logging the statistics
pub fn read_targets<P: AsRef<Path>>(file_path: P) -> Result<Vec<Target>> {
    let (targets, stats) = FileInputHandler::default().read_targets_from_file(file_path)?;

    log::info!(
        "Loaded {} targets ({:?}, {} lines, {} invalid, {} duplicates removed)",
        stats.valid_targets,
        stats.file_format,
        stats.total_lines,
        stats.invalid_targets,
        stats.duplicates_removed
    );

    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_plain_text_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "example.com").unwrap();
        writeln!(temp_file, "# Comment line").unwrap();
        writeln!(temp_file).unwrap();
        writeln!(temp_file, "http://10.0.0.5:3000/").unwrap();

        let handler = FileInputHandler::default();
        let (targets, stats) = handler.read_targets_from_file(temp_file.path()).unwrap();

        assert_eq!(stats.file_format, FileFormat::PlainText);
        assert_eq!(stats.valid_targets, 2);
        assert_eq!(targets[0].as_str(), "https://example.com");
        assert_eq!(targets[1].as_str(), "http://10.0.0.5:3000");
    }

    #[test]
    fn test_json_file() {
        let mut temp_file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(temp_file, r#"["a.example.com", "https://b.example.com"]"#).unwrap();

        let (targets, stats) = FileInputHandler::default()
            .read_targets_from_file(temp_file.path())
            .unwrap();

        assert_eq!(stats.file_format, FileFormat::Json);
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "[\"unterminated").unwrap();
        assert!(FileInputHandler::default()
            .read_targets_from_file(temp_file.path())
            .is_err());
    }

    #[test]
    fn test_duplicate_removal_uses_normalized_form() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "example.com").unwrap();
        writeln!(temp_file, "https://example.com/").unwrap();
        writeln!(temp_file, "other.example.com").unwrap();

        let handler = FileInputHandler::new(1000, true);
        let (targets, stats) = handler.read_targets_from_file(temp_file.path()).unwrap();

        assert_eq!(stats.duplicates_removed, 1);
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn test_invalid_lines_are_counted() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "https://").unwrap();
        writeln!(temp_file, "example.com").unwrap();

        let (targets, stats) = FileInputHandler::default()
            .read_targets_from_file(temp_file.path())
            .unwrap();

        assert_eq!(stats.invalid_targets, 1);
        assert_eq!(targets.len(), 1);
    }

    #[test]
    fn test_max_targets() {
        let mut temp_file = NamedTempFile::new().unwrap();
        for i in 0..10 {
            writeln!(temp_file, "host{}.example.com", i).unwrap();
        }

        let (targets, _) = FileInputHandler::new(3, true)
            .read_targets_from_file(temp_file.path())
            .unwrap();
        assert_eq!(targets.len(), 3);
    }

    #[test]
    fn test_missing_file() {
        assert!(read_targets("/nonexistent/targets.txt").is_err());
    }
}
