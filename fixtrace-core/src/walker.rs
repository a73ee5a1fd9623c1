//! Commit-history correlation
//!
//! Two walks share one traversal skeleton over a repository's commit
//! log, newest to oldest:
//!
//! *Patch mining* seeds a cumulative seen-finding set from the HEAD
//! state, then replays history backwards. A commit touching no contract
//! source is skipped without invoking any external tool. Otherwise both
//! detectors re-run on the touched files only; findings not already
//! seen are newly discovered, grouped by (function, contract), and each
//! group emits one patch row carrying every commit hash traversed since
//! the previous qualifying commit.
//!
//! *Deployment matching* walks each contract file's history and, at
//! each checkout, tries to verify every top-level contract with known
//! candidate addresses against the on-chain ground truth. The first
//! (most recent) matching commit is recorded together with the findings
//! at that revision, and the walk for that file stops.
//!
//! Both walks are strictly sequential within a repository: a checkout
//! overwrites the one shared working tree.

use crate::bytecode::RuntimeCompiler;
use crate::config::ResolvedConfig;
use crate::deployments::{AddressIndex, DeploymentStore, GroundTruthSource};
use crate::detectors::{Detector, DetectorKind, Oyente, Slither};
use crate::finding::{Finding, FindingLedger};
use crate::git::GitRepo;
use crate::matcher;
use crate::metadata::{self, PullRequestSource};
use crate::records::{
    ContractRecord, PatchRecord, Provenance, VulnEntry, VulnerabilitySummary,
};
use crate::sink::CsvSink;
use crate::solidity::{self, SourceUnit};
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Key for grouping newly discovered findings: (function name, contract name)
pub type GroupKey = (String, String);

/// Both detector adapters plus the shared run policy
pub struct DetectorSuite {
    slither: Slither,
    oyente: Option<Oyente>,
}

impl DetectorSuite {
    pub fn from_config(config: &ResolvedConfig) -> DetectorSuite {
        let timeout = Duration::from_secs(config.detector_timeout_secs);
        DetectorSuite {
            slither: Slither::new(timeout),
            oyente: config
                .oyente_path
                .clone()
                .map(|path| Oyente::new(path, timeout)),
        }
    }

    fn detectors(&self) -> Vec<&dyn Detector> {
        let mut detectors: Vec<&dyn Detector> = vec![&self.slither];
        if let Some(oyente) = &self.oyente {
            detectors.push(oyente);
        }
        detectors
    }

    /// Run every detector over the given files
    ///
    /// Files that fail to parse or carry an unsupported pragma are
    /// skipped with a log line. Tool failure degrades to no findings
    /// for that invocation.
    pub fn scan(
        &self,
        files: &[PathBuf],
        parser_cmd: &str,
        remappings: &str,
    ) -> HashMap<DetectorKind, Vec<Finding>> {
        let mut results: HashMap<DetectorKind, Vec<Finding>> = HashMap::new();
        for file in files {
            let tree = match solidity::parse_file(parser_cmd, file) {
                Ok(tree) => tree,
                Err(e) => {
                    warn!(file = %file.display(), "unable to parse file: {e}");
                    continue;
                }
            };
            let version = match solidity::select_solc_version(tree.pragma_solidity()) {
                Some(version) => version,
                None => {
                    info!(file = %file.display(), "incompatible compiler requirement, skipping");
                    continue;
                }
            };

            for detector in self.detectors() {
                if let Some(output) = detector.run(file, &version, remappings) {
                    results
                        .entry(detector.kind())
                        .or_default()
                        .extend(detector.parse(&output, &tree, file));
                }
            }
        }
        results
    }
}

/// Collect analyzable contract files under a repository root
///
/// Vendored, mock, and test paths are excluded; order is sorted for
/// determinism.
pub fn collect_sol_files(repo_root: &Path, config: &ResolvedConfig) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_recursive(repo_root, repo_root, config, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_recursive(
    repo_root: &Path,
    dir: &Path,
    config: &ResolvedConfig,
    files: &mut Vec<PathBuf>,
) -> Result<()> {
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        let rel = path.strip_prefix(repo_root).unwrap_or(&path);
        if path.is_dir() {
            if path.file_name().and_then(|n| n.to_str()) == Some(".git")
                || config.is_excluded(rel)
            {
                continue;
            }
            collect_recursive(repo_root, &path, config, files)?;
        } else if is_contract_path(rel, config) {
            files.push(path);
        }
    }
    Ok(())
}

/// Whether a repo-relative path is analyzable contract source
pub fn is_contract_path(rel: &Path, config: &ResolvedConfig) -> bool {
    rel.extension().and_then(|e| e.to_str()) == Some("sol") && !config.is_excluded(rel)
}

/// Restrict a commit's changed-file list to analyzable contract files
/// still present in the current repository state
pub fn filter_touched(
    changed: &[PathBuf],
    current_files: &HashSet<PathBuf>,
    repo_root: &Path,
    config: &ResolvedConfig,
) -> Vec<PathBuf> {
    changed
        .iter()
        .filter(|rel| is_contract_path(rel, config))
        .map(|rel| repo_root.join(rel))
        .filter(|abs| current_files.contains(abs))
        .collect()
}

/// Library remappings required to compile the repository's contracts
///
/// Each `node_modules` package that ships at least one `.sol` file maps
/// as `name=path`.
pub fn discover_remappings(repo_root: &Path) -> Vec<String> {
    let modules = repo_root.join("node_modules");
    let entries = match std::fs::read_dir(&modules) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    let mut remappings: Vec<String> = entries
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .filter(|entry| contains_sol_file(&entry.path()))
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            Some(format!("{name}={}", entry.path().display()))
        })
        .collect();
    remappings.sort();
    remappings
}

fn contains_sol_file(dir: &Path) -> bool {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return false,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if contains_sol_file(&path) {
                return true;
            }
        } else if path.extension().and_then(|e| e.to_str()) == Some("sol") {
            return true;
        }
    }
    false
}

/// Partition one commit's newly discovered findings by detector
#[derive(Debug, Default)]
pub struct NewFindings {
    pub slither: HashMap<GroupKey, HashSet<Finding>>,
    pub oyente: HashMap<GroupKey, HashSet<Finding>>,
    /// Every (function, contract, file) with at least one new finding
    pub groups: HashSet<(String, String, PathBuf)>,
}

impl NewFindings {
    /// Fold a detector's findings into the ledger, keeping the new ones
    pub fn absorb(
        &mut self,
        kind: DetectorKind,
        findings: Vec<Finding>,
        ledger: &mut FindingLedger,
    ) {
        for finding in findings {
            let key = (finding.function.clone(), finding.contract.clone());
            let meta = (
                finding.function.clone(),
                finding.contract.clone(),
                finding.file.clone(),
            );
            if !ledger.insert(finding.clone()) {
                continue;
            }
            self.groups.insert(meta);
            let map = match kind {
                DetectorKind::Slither => &mut self.slither,
                DetectorKind::Oyente => &mut self.oyente,
            };
            map.entry(key).or_default().insert(finding);
        }
    }

    /// Summarize one group with detector provenance
    ///
    /// A group reported by both detectors is their union under the
    /// "both" provenance — structurally identical findings were already
    /// merged by the ledger, so nothing is double-counted.
    pub fn summarize(&self, key: &GroupKey) -> VulnerabilitySummary {
        let from_slither = self.slither.get(key);
        let from_oyente = self.oyente.get(key);
        let group = match (from_slither, from_oyente) {
            (Some(slither), Some(oyente)) => {
                let mut union: Vec<&Finding> = slither.iter().collect();
                union.extend(oyente.iter().filter(|f| !slither.contains(*f)));
                Some((Provenance::Both, union))
            }
            (Some(slither), None) => Some((Provenance::SlitherOnly, slither.iter().collect())),
            (None, Some(oyente)) => Some((Provenance::OyenteOnly, oyente.iter().collect())),
            (None, None) => None,
        };
        let groups = group
            .map(|(provenance, findings)| {
                let mut entries: Vec<VulnEntry> =
                    findings.iter().map(|f| VulnEntry::from_finding(f)).collect();
                entries.sort_by(|a, b| (&a.kind, &a.lines).cmp(&(&b.kind, &b.lines)));
                vec![(provenance, entries)]
            })
            .unwrap_or_default();
        VulnerabilitySummary { groups }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Everything a patch-mining walk needs besides the repository itself
pub struct PatchDeps<'a> {
    pub config: &'a ResolvedConfig,
    pub suite: &'a DetectorSuite,
    pub pr_source: &'a dyn PullRequestSource,
    pub sink: &'a CsvSink,
}

/// Mine a repository's history for patches (newly introduced findings)
pub fn mine_patches(repo: &GitRepo, full_name: &str, deps: &PatchDeps) -> Result<()> {
    let config = deps.config;
    let root = repo.path().to_path_buf();

    repo.reset_hard()?;
    let branch = repo.default_branch()?;
    repo.checkout(&branch)?;

    let commits = repo.commits_on(&branch)?;
    let current_files = collect_sol_files(&root, config)?;
    let current_set: HashSet<PathBuf> = current_files.iter().cloned().collect();
    let remappings = discover_remappings(&root).join(" ");

    // Seed the seen set from the HEAD state; the backward walk then
    // only reports findings absent from every newer revision.
    let mut ledger = FindingLedger::new();
    for findings in deps
        .suite
        .scan(&current_files, &config.solidity_parser, &remappings)
        .into_values()
    {
        ledger.seed(findings);
    }
    info!(full_name, seeded = ledger.len(), "seeded finding ledger from HEAD");

    let mut span: Vec<String> = Vec::new();
    for commit in &commits {
        span.push(commit.clone());
        repo.checkout(commit)?;

        let changed = repo.changed_files(commit)?;
        let touched = filter_touched(&changed, &current_set, &root, config);
        if touched.is_empty() {
            continue;
        }

        let mut new = NewFindings::default();
        for (kind, findings) in deps
            .suite
            .scan(&touched, &config.solidity_parser, &remappings)
        {
            new.absorb(kind, findings, &mut ledger);
        }
        if new.is_empty() {
            continue;
        }

        let enrichment = metadata::enrich(
            full_name,
            commit,
            deps.pr_source,
            config.issues_dir.as_deref(),
        );

        for (function_name, contract_name, file) in &new.groups {
            let key = (function_name.clone(), contract_name.clone());
            let record = PatchRecord {
                repo_name: full_name.to_string(),
                pr_id: enrichment.pr_id,
                issue_ids: enrichment.issue_ids.clone(),
                commits: span.clone(),
                merged: enrichment.merged,
                contract_name: contract_name.clone(),
                function_name: function_name.clone(),
                contract_file_path: file
                    .strip_prefix(&root)
                    .unwrap_or(file)
                    .to_path_buf(),
                vulnerabilities: new.summarize(&key),
            };
            deps.sink.append(&record.to_row())?;
        }
        span.clear();
    }

    repo.checkout(&branch)?;
    Ok(())
}

/// Everything a deployment-verification walk needs
pub struct ContractDeps<'a> {
    pub config: &'a ResolvedConfig,
    pub suite: &'a DetectorSuite,
    pub index: &'a AddressIndex,
    pub store: &'a DeploymentStore,
    pub ground_truth: &'a dyn GroundTruthSource,
    pub compiler: &'a dyn RuntimeCompiler,
    pub sink: &'a CsvSink,
}

/// Verify every contract file in a repository against on-chain records
pub fn verify_contracts(repo: &GitRepo, full_name: &str, deps: &ContractDeps) -> Result<()> {
    let config = deps.config;
    let root = repo.path().to_path_buf();

    repo.reset_hard()?;
    let branch = repo.default_branch()?;
    repo.checkout(&branch)?;

    let remappings = discover_remappings(&root);
    let contract_files = collect_sol_files(&root, config)?;

    for file in &contract_files {
        verify_contract_file(repo, full_name, file, &branch, &remappings, deps)?;
        repo.clean()?;
        repo.checkout(&branch)?;
    }
    Ok(())
}

/// Walk one contract file's history, newest first, until a deployment
/// matches; the deployment corresponds to the most recent matching
/// revision, so the walk stops there.
fn verify_contract_file(
    repo: &GitRepo,
    full_name: &str,
    file: &Path,
    branch: &str,
    remappings: &[String],
    deps: &ContractDeps,
) -> Result<()> {
    let config = deps.config;
    let root = repo.path();
    let rel = file.strip_prefix(root).unwrap_or(file).to_path_buf();

    repo.clean()?;
    repo.checkout(branch)?;
    let commits = repo.commits_touching(&rel)?;
    let remappings_str = remappings.join(" ");

    for commit in &commits {
        repo.clean()?;
        repo.checkout(commit)?;

        let tree = match solidity::parse_file(&config.solidity_parser, file) {
            Ok(tree) => tree,
            Err(e) => {
                warn!(file = %file.display(), commit, "unable to parse file: {e}");
                continue;
            }
        };

        for contract_name in tree.contract_names() {
            let candidates = match deps.index.candidates(contract_name) {
                Some(candidates) => candidates,
                None => continue,
            };
            let outcome = match matcher::verify_deployment(
                contract_name,
                file,
                candidates,
                remappings,
                deps.store,
                deps.ground_truth,
                deps.compiler,
            ) {
                Some(outcome) => outcome,
                None => continue,
            };

            info!(
                full_name,
                contract_name,
                address = outcome.address,
                commit,
                "verified deployment"
            );
            let summary =
                findings_at_revision(&tree, file, &outcome.compiler_version, &remappings_str, deps);
            let record = ContractRecord {
                repo_name: full_name.to_string(),
                contract_name: contract_name.to_string(),
                commit_hashes: vec![commit.clone()],
                contract_file_path: rel.clone(),
                deployment_address: outcome.address,
                solc_versions: vec![outcome.compiler_version.to_string()],
                vulnerabilities: summary,
            };
            deps.sink.append(&record.to_row())?;
            return Ok(());
        }
    }
    Ok(())
}

/// Findings both detectors report at the matched revision, grouped per
/// detector (no cross-detector merge for the verification row)
fn findings_at_revision(
    tree: &SourceUnit,
    file: &Path,
    version: &semver::Version,
    remappings: &str,
    deps: &ContractDeps,
) -> VulnerabilitySummary {
    let mut groups = Vec::new();
    let suite = deps.suite;
    let detector_runs: Vec<(&dyn Detector, Provenance)> = {
        let mut runs: Vec<(&dyn Detector, Provenance)> =
            vec![(&suite.slither, Provenance::SlitherOnly)];
        if let Some(oyente) = &suite.oyente {
            runs.push((oyente, Provenance::OyenteOnly));
        }
        runs
    };

    for (detector, provenance) in detector_runs {
        if let Some(output) = detector.run(file, version, remappings) {
            let findings = detector.parse(&output, tree, file);
            if !findings.is_empty() {
                let mut entries: Vec<VulnEntry> =
                    findings.iter().map(VulnEntry::from_finding).collect();
                entries.sort_by(|a, b| (&a.kind, &a.lines).cmp(&(&b.kind, &b.lines)));
                groups.push((provenance, entries));
            }
        }
    }
    VulnerabilitySummary { groups }
}
