//! Ground-truth deployment records
//!
//! A deployment record is the publicly verified on-chain datum for one
//! address: declared contract name, exact compiler version, optimizer
//! settings, and the trimmed on-chain runtime bytecode. Records are
//! created lazily on first lookup of an address and cached persistently;
//! once cached they are never refetched or mutated.
//!
//! The cache is shared read-mostly across repository workers. Two
//! workers racing to fetch the same uncached address is tolerated: the
//! value is content-addressed and idempotent, so last writer wins.
//!
//! Cache file format follows the zstd-compressed JSON convention
//! (non-fatal load errors degrade to a cold cache).

use anyhow::{Context, Result};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};

use crate::bytecode::trim_bytecode;

/// Raw deployment details as fetched from the ground-truth source
///
/// Doubles as the wire format external fetcher commands emit as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DeploymentInfo {
    pub contract_name: String,
    /// Compiler version as published, e.g. `v0.5.17+commit.d19bba13`
    pub compiler_version: String,
    pub optimized: bool,
    pub optimized_runs: u32,
    /// Untrimmed on-chain runtime bytecode (hex)
    pub bytecode: String,
}

/// Cached, immutable deployment record keyed by address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DeploymentRecord {
    pub deployment_address: String,
    pub contract_name: String,
    /// Normalized semver string, e.g. `0.5.17`
    pub compiler_version: String,
    pub optimized: bool,
    pub optimized_runs: u32,
    /// Trimmed on-chain runtime bytecode (hex)
    pub bytecode: String,
}

impl DeploymentRecord {
    /// Parse the record's compiler version
    pub fn version(&self) -> Result<Version> {
        Version::parse(&self.compiler_version).with_context(|| {
            format!(
                "invalid compiler version {} for {}",
                self.compiler_version, self.deployment_address
            )
        })
    }
}

/// Ground-truth source seam
///
/// Implementations fetch verified deployment details for an address.
/// Transient failures should be surfaced as errors; the store applies
/// bounded retry with fixed backoff.
pub trait GroundTruthSource: Sync {
    fn fetch(&self, address: &str) -> Result<DeploymentInfo>;
}

/// Normalize a published compiler version string to bare semver
///
/// Strips the leading `v` and the `+commit.<hash>` build suffix.
pub fn normalize_compiler_version(raw: &str) -> &str {
    let raw = raw.strip_prefix('v').unwrap_or(raw);
    raw.split('+').next().unwrap_or(raw)
}

type Cache = HashMap<String, DeploymentRecord>;

/// Persistent, write-once deployment record store
pub struct DeploymentStore {
    path: PathBuf,
    cache: Mutex<Cache>,
    fetch_retries: u32,
    fetch_backoff: Duration,
}

impl DeploymentStore {
    /// Open the store, loading any existing cache file
    ///
    /// A missing or unreadable cache file is a cold start, not an error.
    pub fn open(path: &Path, fetch_retries: u32, fetch_backoff: Duration) -> DeploymentStore {
        let cache = if path.exists() {
            match load_compressed_json(path) {
                Ok(cache) => cache,
                Err(e) => {
                    warn!("failed to load deployment cache (proceeding cold): {e}");
                    Cache::new()
                }
            }
        } else {
            Cache::new()
        };
        DeploymentStore {
            path: path.to_path_buf(),
            cache: Mutex::new(cache),
            fetch_retries,
            fetch_backoff,
        }
    }

    /// Look up an address, fetching and caching it on first use
    ///
    /// The fetch runs outside the cache lock; a concurrent duplicate
    /// fetch of the same address is tolerated and resolves to the same
    /// content-addressed value.
    ///
    /// # Errors
    ///
    /// Returns an error only when the source still fails after the
    /// bounded retries; the caller treats that as "no record" for the
    /// candidate and continues.
    pub fn get_or_fetch(
        &self,
        address: &str,
        source: &dyn GroundTruthSource,
    ) -> Result<DeploymentRecord> {
        if let Some(record) = self
            .cache
            .lock()
            .expect("deployment cache lock poisoned")
            .get(address)
        {
            return Ok(record.clone());
        }

        let info = self.fetch_with_retry(address, source)?;
        let version_str = normalize_compiler_version(&info.compiler_version).to_string();
        let bytecode = match Version::parse(&version_str) {
            Ok(version) => trim_bytecode(&info.bytecode, &version),
            Err(_) => info.bytecode.clone(),
        };
        let record = DeploymentRecord {
            deployment_address: address.to_string(),
            contract_name: info.contract_name,
            compiler_version: version_str,
            optimized: info.optimized,
            optimized_runs: info.optimized_runs,
            bytecode,
        };

        let snapshot = {
            let mut cache = self.cache.lock().expect("deployment cache lock poisoned");
            cache.insert(address.to_string(), record.clone());
            cache.clone()
        };
        if let Err(e) = write_compressed_json(&self.path, &snapshot) {
            warn!("failed to persist deployment cache: {e}");
        }
        Ok(record)
    }

    fn fetch_with_retry(
        &self,
        address: &str,
        source: &dyn GroundTruthSource,
    ) -> Result<DeploymentInfo> {
        let attempts = self.fetch_retries.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match source.fetch(address) {
                Ok(info) => {
                    info!(address, "fetched deployment record");
                    return Ok(info);
                }
                Err(e) => {
                    warn!(address, attempt, "deployment fetch failed: {e}");
                    last_err = Some(e);
                    if attempt < attempts {
                        std::thread::sleep(self.fetch_backoff);
                    }
                }
            }
        }
        Err(last_err.expect("at least one attempt").context(format!(
            "deployment fetch exhausted {attempts} attempts for {address}"
        )))
    }
}

fn load_compressed_json(path: &Path) -> Result<Cache> {
    let compressed = std::fs::read(path)
        .with_context(|| format!("failed to read deployment cache: {}", path.display()))?;
    let bytes = zstd::decode_all(compressed.as_slice())
        .with_context(|| format!("failed to decompress deployment cache: {}", path.display()))?;
    serde_json::from_slice(&bytes).context("failed to parse deployment cache JSON")
}

fn write_compressed_json(path: &Path, cache: &Cache) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    let json = serde_json::to_vec(cache).context("failed to serialize deployment cache")?;
    let compressed =
        zstd::encode_all(json.as_slice(), 3).context("failed to compress deployment cache")?;
    std::fs::write(path, compressed)
        .with_context(|| format!("failed to write deployment cache: {}", path.display()))
}

/// Contract-name to candidate-address index
///
/// Built from the verified-contracts CSV (one row per verified
/// deployment: transaction hash, address, contract name). Addresses for
/// a name keep file order; the matcher tries them in that order.
#[derive(Debug, Default)]
pub struct AddressIndex {
    by_name: HashMap<String, Vec<String>>,
}

impl AddressIndex {
    /// Load the index from the verified-contracts CSV
    pub fn load(path: &Path) -> Result<AddressIndex> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("failed to open verified contracts CSV: {}", path.display()))?;
        let mut by_name: HashMap<String, Vec<String>> = HashMap::new();
        for result in reader.records() {
            let row = result.context("invalid verified contracts CSV row")?;
            let (address, name) = match (row.get(1), row.get(2)) {
                (Some(address), Some(name)) if !address.is_empty() && !name.is_empty() => {
                    (address, name)
                }
                _ => continue,
            };
            by_name
                .entry(name.to_string())
                .or_default()
                .push(address.to_string());
        }
        Ok(AddressIndex { by_name })
    }

    /// Candidate addresses recorded under a contract name, in file order
    pub fn candidates(&self, contract_name: &str) -> Option<&[String]> {
        self.by_name.get(contract_name).map(Vec::as_slice)
    }

    pub fn contains(&self, contract_name: &str) -> bool {
        self.by_name.contains_key(contract_name)
    }

    #[cfg(test)]
    pub fn from_entries(entries: &[(&str, &str)]) -> AddressIndex {
        let mut by_name: HashMap<String, Vec<String>> = HashMap::new();
        for (name, address) in entries {
            by_name
                .entry(name.to_string())
                .or_default()
                .push(address.to_string());
        }
        AddressIndex { by_name }
    }
}
