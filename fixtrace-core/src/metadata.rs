//! Commit metadata enrichment
//!
//! Patch rows carry the pull request that merged a commit and the issue
//! threads discussing it. PR lookup needs the forge and lives behind a
//! trait; issue references are scanned from a locally extracted issues
//! directory (one `*_<id>.txt` file per issue). Enrichment is best
//! effort and attached to output records unchanged — it never affects
//! the walk itself.

use std::path::Path;
use tracing::debug;

/// Enrichment attached to a qualifying commit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitMetadata {
    pub pr_id: Option<u64>,
    pub merged: bool,
    pub issue_ids: Option<Vec<u64>>,
}

/// Forge lookup seam: which PR merged a commit, if any
///
/// Implementations must be best effort; a lookup failure is simply
/// "no PR, not merged", never an error.
pub trait PullRequestSource: Sync {
    fn pr_for_commit(&self, full_name: &str, commit: &str) -> (Option<u64>, bool);
}

/// Source that knows nothing (offline runs)
pub struct NullPullRequestSource;

impl PullRequestSource for NullPullRequestSource {
    fn pr_for_commit(&self, _full_name: &str, _commit: &str) -> (Option<u64>, bool) {
        (None, false)
    }
}

/// Build the full enrichment for one commit
pub fn enrich(
    full_name: &str,
    commit: &str,
    pr_source: &dyn PullRequestSource,
    issues_dir: Option<&Path>,
) -> CommitMetadata {
    let (pr_id, merged) = pr_source.pr_for_commit(full_name, commit);
    let issue_ids = match (pr_id, issues_dir) {
        (Some(pr_id), Some(issues_dir)) => {
            let repo_issues = issues_dir.join(full_name.replace('/', "__"));
            issue_ids_for_pr(&repo_issues, pr_id)
        }
        _ => None,
    };
    CommitMetadata {
        pr_id,
        merged,
        issue_ids,
    }
}

/// Issue ids whose extracted text references `#<pr_id>`
///
/// Scans `*.txt` files under the repository's issues directory; the
/// issue id is the final `_`-separated component of the file stem. A
/// reference only counts when the PR number is not a prefix of a longer
/// number (`#42` must not match `#421`).
pub fn issue_ids_for_pr(repo_issues_dir: &Path, pr_id: u64) -> Option<Vec<u64>> {
    if !repo_issues_dir.is_dir() {
        return None;
    }
    let needle = format!("#{pr_id}");
    let mut issue_ids = Vec::new();
    collect_issue_files(repo_issues_dir, &needle, &mut issue_ids);
    issue_ids.sort_unstable();
    issue_ids.dedup();
    if issue_ids.is_empty() {
        None
    } else {
        Some(issue_ids)
    }
}

fn collect_issue_files(dir: &Path, needle: &str, issue_ids: &mut Vec<u64>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("cannot read issues directory {}: {e}", dir.display());
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_issue_files(&path, needle, issue_ids);
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }
        let issue_id = match path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|stem| stem.rsplit('_').next())
            .and_then(|id| id.parse::<u64>().ok())
        {
            Some(id) => id,
            None => continue,
        };
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(_) => continue,
        };
        if text.lines().any(|line| references_pr(line, needle)) {
            issue_ids.push(issue_id);
        }
    }
}

/// Whether a line mentions the PR number as a whole token
fn references_pr(line: &str, needle: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = line[start..].find(needle) {
        let end = start + pos + needle.len();
        match line[end..].chars().next() {
            Some(next) if next.is_ascii_digit() => {}
            _ => return true,
        }
        start = end;
    }
    false
}
