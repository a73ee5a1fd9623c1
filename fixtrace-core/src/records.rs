//! Typed output records
//!
//! One struct per CSV row type in the dataset: repository metadata,
//! patch rows, and contract-verification rows. Fields are validated and
//! converted once at construction; rows with unknown columns are
//! rejected when read back.
//!
//! The vulnerability summary column groups findings by provenance
//! ("which detectors reported them") and renders as
//! `Slither|Oyente:kind(1:2)|kind2(5);Slither:kind3(7)`.

use crate::finding::Finding;
use anyhow::{Context, Result};
use std::fmt;
use std::path::PathBuf;

pub const PATCH_HEADERS: [&str; 9] = [
    "RepoName",
    "PRID",
    "IssueIDs",
    "Commits",
    "Merged",
    "ContractName",
    "FunctionName",
    "ContractFilePath",
    "Vulnerabilities",
];

pub const CONTRACT_HEADERS: [&str; 7] = [
    "RepoName",
    "ContractName",
    "CommitHashes",
    "ContractFilePath",
    "DeploymentAddress",
    "SOLC-Version",
    "Vulnerabilities",
];

pub const REPO_HEADERS: [&str; 6] = [
    "RepoName",
    "#Stars",
    "#Watchers",
    "InspectionTime",
    "LastActivityTime",
    "#ContractFiles",
];

/// Which detectors reported a group of findings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    Both,
    SlitherOnly,
    OyenteOnly,
}

impl Provenance {
    fn render(&self) -> &'static str {
        match self {
            Provenance::Both => "Slither|Oyente",
            Provenance::SlitherOnly => "Slither",
            Provenance::OyenteOnly => "Oyente",
        }
    }

    fn parse(raw: &str) -> Result<Provenance> {
        match raw {
            "Slither|Oyente" => Ok(Provenance::Both),
            "Slither" => Ok(Provenance::SlitherOnly),
            "Oyente" => Ok(Provenance::OyenteOnly),
            other => anyhow::bail!("unknown detector provenance: {other}"),
        }
    }
}

/// One vulnerability in a summary: kind name plus its reported lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VulnEntry {
    pub kind: String,
    pub lines: Vec<u32>,
}

impl VulnEntry {
    pub fn from_finding(finding: &Finding) -> VulnEntry {
        VulnEntry {
            kind: finding.kind.clone(),
            lines: finding.lines.clone(),
        }
    }
}

impl fmt::Display for VulnEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines = self
            .lines
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join(":");
        write!(f, "{}({lines})", self.kind)
    }
}

/// Provenance-grouped vulnerability summary for one output row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VulnerabilitySummary {
    pub groups: Vec<(Provenance, Vec<VulnEntry>)>,
}

impl VulnerabilitySummary {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Render to the `prov:kind(lines)|...;prov:...` column format
    pub fn render(&self) -> String {
        self.groups
            .iter()
            .map(|(provenance, entries)| {
                let rendered = entries
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("|");
                format!("{}:{rendered}", provenance.render())
            })
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Parse the column format back into groups
    pub fn parse(raw: &str) -> Result<VulnerabilitySummary> {
        let mut groups = Vec::new();
        if raw.is_empty() {
            return Ok(VulnerabilitySummary { groups });
        }
        for group in raw.split(';') {
            let (detectors, entries) = group
                .split_once(':')
                .with_context(|| format!("malformed vulnerability group: {group}"))?;
            let provenance = Provenance::parse(detectors)?;
            let entries = split_entries(entries)
                .into_iter()
                .map(|entry| parse_entry(&entry))
                .collect::<Result<Vec<_>>>()?;
            groups.push((provenance, entries));
        }
        Ok(VulnerabilitySummary { groups })
    }
}

/// Split `kind(1:2)|kind2(5)` into whole entries
///
/// A plain `'|'` split would break kinds containing `'|'`-free parens
/// groupings; entries end at `')'`, so split only on a `'|'` that
/// follows one.
fn split_entries(raw: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut current = String::new();
    let mut after_paren = false;
    for ch in raw.chars() {
        if ch == '|' && after_paren {
            entries.push(std::mem::take(&mut current));
            after_paren = false;
            continue;
        }
        after_paren = ch == ')';
        current.push(ch);
    }
    if !current.is_empty() {
        entries.push(current);
    }
    entries
}

fn parse_entry(raw: &str) -> Result<VulnEntry> {
    let open = raw
        .rfind('(')
        .with_context(|| format!("malformed vulnerability entry: {raw}"))?;
    let close = raw
        .rfind(')')
        .filter(|&close| close > open)
        .with_context(|| format!("malformed vulnerability entry: {raw}"))?;
    let kind = raw[..open].to_string();
    let lines = raw[open + 1..close]
        .split(':')
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u32>()
                .with_context(|| format!("invalid line number in entry: {raw}"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(VulnEntry { kind, lines })
}

/// Encode an optional id with the `'null'` sentinel
fn render_opt_id(id: Option<u64>) -> String {
    id.map(|id| id.to_string()).unwrap_or_else(|| "null".to_string())
}

fn join_ids(ids: &[u64]) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(";")
}

/// The dataset carries capitalized booleans (`True`/`False`)
fn render_bool(value: bool) -> String {
    if value { "True" } else { "False" }.to_string()
}

/// A patch row: one (function, contract) group of newly introduced
/// findings, bound to the commit span that introduced them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRecord {
    pub repo_name: String,
    pub pr_id: Option<u64>,
    pub issue_ids: Option<Vec<u64>>,
    /// Commit hashes traversed since the previous qualifying commit
    pub commits: Vec<String>,
    pub merged: bool,
    pub contract_name: String,
    /// Empty string = file-level default function, `constructor` sentinel for constructors
    pub function_name: String,
    pub contract_file_path: PathBuf,
    pub vulnerabilities: VulnerabilitySummary,
}

impl PatchRecord {
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.repo_name.clone(),
            render_opt_id(self.pr_id),
            self.issue_ids
                .as_ref()
                .filter(|ids| !ids.is_empty())
                .map(|ids| join_ids(ids))
                .unwrap_or_else(|| "null".to_string()),
            self.commits.join(";"),
            render_bool(self.merged),
            self.contract_name.clone(),
            self.function_name.clone(),
            self.contract_file_path.to_string_lossy().into_owned(),
            self.vulnerabilities.render(),
        ]
    }

    pub fn from_row(row: &[String]) -> Result<PatchRecord> {
        anyhow::ensure!(
            row.len() == PATCH_HEADERS.len(),
            "patch row has {} fields, expected {}",
            row.len(),
            PATCH_HEADERS.len()
        );
        Ok(PatchRecord {
            repo_name: row[0].clone(),
            pr_id: parse_opt_id(&row[1]).context("invalid PRID")?,
            issue_ids: parse_opt_ids(&row[2]).context("invalid IssueIDs")?,
            commits: row[3].split(';').map(str::to_string).collect(),
            merged: parse_bool(&row[4]).context("invalid Merged flag")?,
            contract_name: row[5].clone(),
            function_name: row[6].clone(),
            contract_file_path: PathBuf::from(&row[7]),
            vulnerabilities: VulnerabilitySummary::parse(&row[8])?,
        })
    }
}

/// A contract-verification row: the commit whose compiled bytecode
/// matches a verified on-chain deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractRecord {
    pub repo_name: String,
    pub contract_name: String,
    pub commit_hashes: Vec<String>,
    pub contract_file_path: PathBuf,
    pub deployment_address: String,
    pub solc_versions: Vec<String>,
    pub vulnerabilities: VulnerabilitySummary,
}

impl ContractRecord {
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.repo_name.clone(),
            self.contract_name.clone(),
            self.commit_hashes.join(";"),
            self.contract_file_path.to_string_lossy().into_owned(),
            self.deployment_address.clone(),
            self.solc_versions.join(";"),
            self.vulnerabilities.render(),
        ]
    }

    pub fn from_row(row: &[String]) -> Result<ContractRecord> {
        anyhow::ensure!(
            row.len() == CONTRACT_HEADERS.len(),
            "contract row has {} fields, expected {}",
            row.len(),
            CONTRACT_HEADERS.len()
        );
        Ok(ContractRecord {
            repo_name: row[0].clone(),
            contract_name: row[1].clone(),
            commit_hashes: row[2].split(';').map(str::to_string).collect(),
            contract_file_path: PathBuf::from(&row[3]),
            deployment_address: row[4].clone(),
            solc_versions: row[5].split(';').map(str::to_string).collect(),
            vulnerabilities: VulnerabilitySummary::parse(&row[6])?,
        })
    }
}

/// Repository metadata produced by the discovery stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRecord {
    pub repo_name: String,
    pub stars: u64,
    pub watchers: u64,
    pub inspection_time: String,
    pub last_activity_time: String,
    pub contract_files: u64,
}

impl RepoRecord {
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.repo_name.clone(),
            self.stars.to_string(),
            self.watchers.to_string(),
            self.inspection_time.clone(),
            self.last_activity_time.clone(),
            self.contract_files.to_string(),
        ]
    }

    pub fn from_row(row: &[String]) -> Result<RepoRecord> {
        anyhow::ensure!(
            row.len() == REPO_HEADERS.len(),
            "repo row has {} fields, expected {}",
            row.len(),
            REPO_HEADERS.len()
        );
        Ok(RepoRecord {
            repo_name: row[0].clone(),
            stars: row[1].parse().context("invalid #Stars")?,
            watchers: row[2].parse().context("invalid #Watchers")?,
            inspection_time: row[3].clone(),
            last_activity_time: row[4].clone(),
            contract_files: row[5].parse().context("invalid #ContractFiles")?,
        })
    }
}

fn parse_opt_id(raw: &str) -> Result<Option<u64>> {
    if raw == "null" {
        return Ok(None);
    }
    Ok(Some(raw.parse()?))
}

fn parse_opt_ids(raw: &str) -> Result<Option<Vec<u64>>> {
    if raw == "null" {
        return Ok(None);
    }
    let ids = raw
        .split(';')
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<u64>().map_err(anyhow::Error::from))
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(ids))
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw {
        "True" | "true" => Ok(true),
        "False" | "false" => Ok(false),
        other => anyhow::bail!("not a boolean: {other}"),
    }
}
