//! Version detection from a project checkout
//!
//! Walks a directory tree, reads the framework version pinned by the package
//! manifest and the lockfiles next to it, and classifies every version found.
//! Nothing is sent over the network.

use crate::scanner::ScanVerdict;
use crate::target::Target;
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

static PACKAGE_JSON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""next"\s*:\s*"([^"]+)""#).expect("package.json regex is valid"));

static PACKAGE_LOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""(?:node_modules/)?next"\s*:\s*\{[^}]*?"version"\s*:\s*"([^"]+)""#)
        .expect("package-lock regex is valid")
});

static YARN_LOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^"?next@[^\n]*:[ \t]*\n[ \t]+version:?[ \t]+"?([^"\s]+)"#)
        .expect("yarn.lock regex is valid")
});

static PNPM_LOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)(?:^|[\s/'"])next@([0-9]+\.[0-9]+\.[0-9]+(?:-canary\.\d+)?)"#)
        .expect("pnpm-lock regex is valid")
});

const SKIPPED_DIR: &str = "node_modules";

/// Files that pin a framework version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lockfile {
    PackageJson,
    PackageLock,
    YarnLock,
    PnpmLock,
}

impl Lockfile {
    pub const ALL: [Lockfile; 4] = [
        Lockfile::PackageJson,
        Lockfile::PackageLock,
        Lockfile::YarnLock,
        Lockfile::PnpmLock,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            Lockfile::PackageJson => "package.json",
            Lockfile::PackageLock => "package-lock.json",
            Lockfile::YarnLock => "yarn.lock",
            Lockfile::PnpmLock => "pnpm-lock.yaml",
        }
    }

    fn from_file_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.file_name() == name)
    }

    /// Framework version pinned in `content`, with range operators stripped
    pub fn extract_version(&self, content: &str) -> Option<String> {
        let re = match self {
            Lockfile::PackageJson => &PACKAGE_JSON_RE,
            Lockfile::PackageLock => &PACKAGE_LOCK_RE,
            Lockfile::YarnLock => &YARN_LOCK_RE,
            Lockfile::PnpmLock => &PNPM_LOCK_RE,
        };
        let raw = re.captures(content)?.get(1)?.as_str();
        let version = raw.trim_start_matches(|c| c == '^' || c == '~').trim();
        (!version.is_empty()).then(|| version.to_string())
    }
}

/// Scan a project directory, or a single manifest file, for pinned versions.
///
/// Returns one classified verdict per file that names a version. Unreadable
/// subdirectories are skipped; an unreadable root is an error.
pub fn scan_project<P: AsRef<Path>>(root: P) -> Result<Vec<ScanVerdict>> {
    let root = root.as_ref();
    let meta = fs::metadata(root)
        .with_context(|| format!("Failed to read project path: {:?}", root))?;

    let files = if meta.is_file() {
        vec![root.to_path_buf()]
    } else {
        let mut files = Vec::new();
        walk(root, &mut files)
            .with_context(|| format!("Failed to list project directory: {:?}", root))?;
        files
    };

    let mut verdicts = Vec::new();
    for path in files {
        match scan_file(&path) {
            Ok(Some(verdict)) => verdicts.push(verdict),
            Ok(None) => {}
            Err(e) => log::warn!("Skipping {}: {:#}", path.display(), e),
        }
    }
    log::debug!("{} version pins found under {}", verdicts.len(), root.display());
    Ok(verdicts)
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let mut entries = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .collect::<Vec<_>>();
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            if entry.file_name() == SKIPPED_DIR {
                continue;
            }
            if let Err(e) = walk(&path, files) {
                log::debug!("Cannot read {}: {}", path.display(), e);
            }
        } else if file_type.is_file() && lockfile_for(&path).is_some() {
            files.push(path);
        }
    }
    Ok(())
}

fn lockfile_for(path: &Path) -> Option<Lockfile> {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(Lockfile::from_file_name)
}

fn scan_file(path: &Path) -> Result<Option<ScanVerdict>> {
    let Some(lockfile) = lockfile_for(path) else {
        return Ok(None);
    };
    let content = fs::read_to_string(path)?;
    let Some(version) = lockfile.extract_version(&content) else {
        return Ok(None);
    };

    let target = Target::from_path(path)?;
    let evidence = format!("next {} pinned in {}", version, lockfile.file_name());
    Ok(Some(ScanVerdict::classified(&target, &version, evidence)))
}
