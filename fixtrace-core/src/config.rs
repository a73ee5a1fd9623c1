//! Configuration file support for Fixtrace
//!
//! Loads project-specific configuration from JSON files.
//!
//! Search order:
//! 1. Explicit path (--config CLI flag)
//! 2. `.fixtracerc.json` in the working directory
//! 3. `fixtrace.config.json` in the working directory
//!
//! All fields are optional. CLI flags take precedence over config file values.
//! The resolved configuration is passed explicitly to the walker and the
//! detector adapters at construction; there is no process-wide mutable state.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Path components excluded from analysis when no config is specified.
///
/// Vendored, mock, and test contracts are skipped both when collecting
/// files from a checkout and when filtering a commit's changed-file list.
const DEFAULT_EXCLUDES: &[&str] = &["**/node_modules/**", "**/mocks/**", "**/test/**", "**/tests/**"];

/// Fixtrace configuration loaded from a JSON config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtraceConfig {
    /// Glob patterns for contract paths to exclude (default: vendored/mock/test paths)
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Repository full names that are never processed
    #[serde(default)]
    pub blacklist: Vec<String>,

    /// Command used to parse Solidity sources into a JSON AST
    #[serde(default)]
    pub solidity_parser: Option<String>,

    /// Path to the solc binary (version selected via SOLC_VERSION)
    #[serde(default)]
    pub solc: Option<String>,

    /// Absolute path to oyente.py
    #[serde(default)]
    pub oyente_path: Option<PathBuf>,

    /// Number of repository workers to run concurrently
    #[serde(default)]
    pub workers: Option<usize>,

    /// Directory where repositories are cloned
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Directory for durable logs
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Directory holding locally extracted issue data, one subdirectory per repository
    #[serde(default)]
    pub issues_dir: Option<PathBuf>,

    /// Seconds before an external detector invocation is killed
    #[serde(default)]
    pub detector_timeout_secs: Option<u64>,

    /// Bounded retry count for ground-truth fetches
    #[serde(default)]
    pub fetch_retries: Option<u32>,

    /// Fixed backoff between ground-truth fetch retries, in seconds
    #[serde(default)]
    pub fetch_backoff_secs: Option<u64>,

    /// Maximum clone attempts before a repository worker gives up
    #[serde(default)]
    pub clone_attempts: Option<u32>,
}

/// Resolved configuration with compiled glob patterns
#[derive(Debug)]
pub struct ResolvedConfig {
    /// Compiled exclude patterns for contract paths
    pub exclude: GlobSet,
    pub blacklist: Vec<String>,
    pub solidity_parser: String,
    pub solc: String,
    pub oyente_path: Option<PathBuf>,
    pub workers: usize,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub issues_dir: Option<PathBuf>,
    pub detector_timeout_secs: u64,
    pub fetch_retries: u32,
    pub fetch_backoff_secs: u64,
    pub clone_attempts: u32,
}

impl FixtraceConfig {
    /// Load configuration from an explicit path or by auto-discovery
    pub fn load(explicit: Option<&Path>, cwd: &Path) -> Result<Option<FixtraceConfig>> {
        if let Some(path) = explicit {
            return Ok(Some(Self::from_file(path)?));
        }
        for candidate in [".fixtracerc.json", "fixtrace.config.json"] {
            let path = cwd.join(candidate);
            if path.exists() {
                return Ok(Some(Self::from_file(&path)?));
            }
        }
        Ok(None)
    }

    /// Parse a config file, rejecting unknown fields
    pub fn from_file(path: &Path) -> Result<FixtraceConfig> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid config file: {}", path.display()))
    }

    /// Resolve into a validated configuration with compiled globs
    pub fn resolve(self, cwd: &Path) -> Result<ResolvedConfig> {
        let patterns: Vec<String> = if self.exclude.is_empty() {
            DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect()
        } else {
            self.exclude
        };

        let mut builder = GlobSetBuilder::new();
        for pattern in &patterns {
            let glob = Glob::new(pattern)
                .with_context(|| format!("invalid exclude pattern: {pattern}"))?;
            builder.add(glob);
        }
        let exclude = builder.build().context("failed to compile exclude patterns")?;

        Ok(ResolvedConfig {
            exclude,
            blacklist: self.blacklist,
            solidity_parser: self
                .solidity_parser
                .unwrap_or_else(|| "solidity_parser".to_string()),
            solc: self.solc.unwrap_or_else(|| "solc".to_string()),
            oyente_path: self.oyente_path,
            workers: self.workers.unwrap_or(1).max(1),
            data_dir: self.data_dir.unwrap_or_else(|| cwd.join("data")),
            log_dir: self.log_dir.unwrap_or_else(|| cwd.join("Logs")),
            issues_dir: self.issues_dir,
            detector_timeout_secs: self.detector_timeout_secs.unwrap_or(300),
            fetch_retries: self.fetch_retries.unwrap_or(3),
            fetch_backoff_secs: self.fetch_backoff_secs.unwrap_or(20),
            clone_attempts: self.clone_attempts.unwrap_or(10),
        })
    }
}

impl ResolvedConfig {
    /// Resolve the default configuration (no config file present)
    pub fn default_in(cwd: &Path) -> Result<ResolvedConfig> {
        FixtraceConfig::default().resolve(cwd)
    }

    /// Whether a repo-relative contract path is excluded from analysis
    pub fn is_excluded(&self, rel_path: &Path) -> bool {
        self.exclude.is_match(rel_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_excludes_cover_vendored_and_test_paths() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = ResolvedConfig::default_in(tmp.path()).expect("resolve");

        assert!(config.is_excluded(Path::new("node_modules/openzeppelin/Ownable.sol")));
        assert!(config.is_excluded(Path::new("contracts/mocks/TokenMock.sol")));
        assert!(config.is_excluded(Path::new("test/Foo.sol")));
        assert!(!config.is_excluded(Path::new("contracts/Token.sol")));
    }

    #[test]
    fn unknown_config_fields_are_rejected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("fixtrace.config.json");
        std::fs::write(&path, r#"{"workrs": 4}"#).expect("write");
        assert!(FixtraceConfig::from_file(&path).is_err());
    }

    #[test]
    fn explicit_config_overrides_defaults() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("custom.json");
        std::fs::write(&path, r#"{"workers": 4, "solc": "/opt/solc/solc"}"#).expect("write");

        let config = FixtraceConfig::load(Some(&path), tmp.path())
            .expect("load")
            .expect("present")
            .resolve(tmp.path())
            .expect("resolve");
        assert_eq!(config.workers, 4);
        assert_eq!(config.solc, "/opt/solc/solc");
    }
}
