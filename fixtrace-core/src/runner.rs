//! Repository-level scheduling
//!
//! A mining run processes many repositories, each an independent failure
//! domain: one repository's error is logged and never aborts the run.
//! Parallelism is bounded by a dedicated rayon pool sized from the
//! configuration; within a repository all work stays sequential because
//! checkouts mutate one shared working tree.
//!
//! Runs are resumable: repositories already present in the output file
//! are skipped, as are blacklisted ones.

use crate::config::ResolvedConfig;
use crate::records::{RepoRecord, REPO_HEADERS};
use crate::sink;
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{error, info};

/// Counts for one completed run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Repository full names listed in the discovery-stage output
pub fn load_repo_names(path: &Path) -> Result<Vec<String>> {
    let rows = sink::read_rows(path, &REPO_HEADERS)?;
    rows.iter()
        .map(|row| RepoRecord::from_row(row).map(|record| record.repo_name))
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("invalid repository listing: {}", path.display()))
}

/// Run `work` once per repository on a bounded worker pool
///
/// `done` holds repositories already present in the output; together
/// with the configured blacklist they are skipped up front. `work`
/// receives the repository full name and owns everything from clone to
/// row emission; its error is logged against that repository only.
pub fn run_repos<F>(
    config: &ResolvedConfig,
    repos: &[String],
    done: &HashSet<String>,
    work: F,
) -> Result<RunSummary>
where
    F: Fn(&str) -> Result<()> + Sync,
{
    let blacklist: HashSet<&str> = config.blacklist.iter().map(String::as_str).collect();
    let (eligible, skipped): (Vec<&String>, Vec<&String>) = repos
        .iter()
        .partition(|name| !done.contains(*name) && !blacklist.contains(name.as_str()));
    for name in &skipped {
        info!(full_name = %name, "skipping repository (done or blacklisted)");
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .build()
        .context("failed to build worker pool")?;

    let failed = AtomicUsize::new(0);
    pool.install(|| {
        eligible.par_iter().for_each(|full_name| {
            if let Err(e) = work(full_name) {
                failed.fetch_add(1, Ordering::Relaxed);
                error!(full_name = %full_name, "repository failed: {e:#}");
            }
        });
    });

    let failed = failed.load(Ordering::Relaxed);
    let summary = RunSummary {
        processed: eligible.len() - failed,
        skipped: skipped.len(),
        failed,
    };
    info!(
        processed = summary.processed,
        skipped = summary.skipped,
        failed = summary.failed,
        "run complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FixtraceConfig;
    use std::sync::Mutex;

    fn config_with(blacklist: &[&str], workers: usize) -> ResolvedConfig {
        let tmp = std::env::temp_dir();
        FixtraceConfig {
            blacklist: blacklist.iter().map(|s| s.to_string()).collect(),
            workers: Some(workers),
            ..FixtraceConfig::default()
        }
        .resolve(&tmp)
        .expect("resolve")
    }

    fn names(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn done_and_blacklisted_repos_are_skipped() {
        let config = config_with(&["acme/banned"], 1);
        let repos = names(&["acme/vault", "acme/banned", "acme/token", "acme/done"]);
        let done: HashSet<String> = ["acme/done".to_string()].into_iter().collect();

        let seen = Mutex::new(Vec::new());
        let summary = run_repos(&config, &repos, &done, |name| {
            seen.lock().expect("lock").push(name.to_string());
            Ok(())
        })
        .expect("run");

        let mut seen = seen.into_inner().expect("lock");
        seen.sort();
        assert_eq!(seen, vec!["acme/token", "acme/vault"]);
        assert_eq!(summary, RunSummary { processed: 2, skipped: 2, failed: 0 });
    }

    #[test]
    fn one_failing_repo_does_not_stop_the_rest() {
        let config = config_with(&[], 2);
        let repos = names(&["acme/bad", "acme/vault", "acme/token"]);

        let completed = AtomicUsize::new(0);
        let summary = run_repos(&config, &repos, &HashSet::new(), |name| {
            if name == "acme/bad" {
                anyhow::bail!("clone exploded");
            }
            completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .expect("run");

        assert_eq!(completed.load(Ordering::SeqCst), 2);
        assert_eq!(summary, RunSummary { processed: 2, skipped: 0, failed: 1 });
    }

    #[test]
    fn repo_names_load_from_discovery_output() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("Repos.csv");
        std::fs::write(
            &path,
            "RepoName,#Stars,#Watchers,InspectionTime,LastActivityTime,#ContractFiles\n\
             acme/vault,12,3,2020-07-14 10:00:00,2020-07-01T12:00:00Z,5\n\
             acme/token,7,1,2020-07-14 10:01:00,2020-06-20T08:00:00Z,2\n",
        )
        .expect("write");

        let repos = load_repo_names(&path).expect("load");
        assert_eq!(repos, vec!["acme/vault", "acme/token"]);
    }
}
