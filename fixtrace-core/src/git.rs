//! Version-control provider
//!
//! Thin wrapper over the git CLI (no libgit2, for portability). One
//! `GitRepo` owns one working tree; checkouts mutate it in place, so all
//! operations on a repository are strictly sequential and a working tree
//! is never shared between workers.
//!
//! Re-clone and reset are idempotent so repeated runs resume cleanly.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::warn;

const GITHUB: &str = "https://github.com";

/// Handle to a cloned repository's working tree
#[derive(Debug, Clone)]
pub struct GitRepo {
    path: PathBuf,
}

impl GitRepo {
    /// Open an existing repository
    pub fn open(path: &Path) -> Result<GitRepo> {
        let repo = GitRepo {
            path: path.to_path_buf(),
        };
        repo.git(&["rev-parse", "--git-dir"])
            .with_context(|| format!("not a git repository: {}", path.display()))?;
        Ok(repo)
    }

    /// Clone a repository under `workdir`, or reset an existing clone
    ///
    /// `full_name` is `owner/name`. Cloning retries up to `attempts`
    /// times; an existing clone is hard-reset and switched back to its
    /// default branch so repeated runs resume from a clean state.
    pub fn clone_or_reset(workdir: &Path, full_name: &str, attempts: u32) -> Result<GitRepo> {
        let repo_name = full_name
            .split('/')
            .nth(1)
            .with_context(|| format!("malformed repository name: {full_name}"))?;
        let dest = workdir.join(repo_name);

        if dest.exists() {
            let repo = GitRepo::open(&dest)?;
            repo.reset_hard()?;
            let branch = repo.default_branch()?;
            repo.checkout(&branch)?;
            return Ok(repo);
        }

        std::fs::create_dir_all(workdir)
            .with_context(|| format!("failed to create directory: {}", workdir.display()))?;
        let url = format!("{GITHUB}/{full_name}");
        let mut last_err = None;
        for attempt in 1..=attempts.max(1) {
            match git_in(workdir, &["clone", &url]) {
                Ok(_) => return GitRepo::open(&dest),
                Err(e) => {
                    warn!(full_name, attempt, "clone failed: {e}");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err
            .expect("at least one attempt")
            .context(format!("failed to clone {full_name}")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The branch HEAD points at
    ///
    /// Falls back through `master` and `main` when HEAD is detached.
    pub fn default_branch(&self) -> Result<String> {
        if let Ok(branch) = self.git(&["symbolic-ref", "--short", "HEAD"]) {
            return Ok(branch);
        }
        for candidate in ["master", "main"] {
            if self.git(&["rev-parse", "--verify", candidate]).is_ok() {
                return Ok(candidate.to_string());
            }
        }
        anyhow::bail!("cannot determine default branch for {}", self.path.display())
    }

    pub fn checkout(&self, rev: &str) -> Result<()> {
        self.git(&["checkout", rev])
            .with_context(|| format!("failed to checkout {rev}"))?;
        Ok(())
    }

    /// Remove untracked and ignored files (build artifacts between checkouts)
    pub fn clean(&self) -> Result<()> {
        self.git(&["clean", "-xdf", "-e", "node_modules"])?;
        Ok(())
    }

    pub fn reset_hard(&self) -> Result<()> {
        self.git(&["reset", "--hard"])?;
        Ok(())
    }

    /// Commit ids on a branch, newest first
    pub fn commits_on(&self, branch: &str) -> Result<Vec<String>> {
        let out = self.git(&["log", "--pretty=%H", branch])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    /// Commit ids touching a path, newest first
    pub fn commits_touching(&self, path: &Path) -> Result<Vec<String>> {
        let out = self.git(&[
            "log",
            "--pretty=%H",
            "--",
            &path.to_string_lossy(),
        ])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    /// Paths changed by a commit relative to its parent
    ///
    /// Merge commits list changes relative to the primary parent first;
    /// the list stops at the first blank separator so only the primary
    /// parent's diff is returned.
    pub fn changed_files(&self, commit: &str) -> Result<Vec<PathBuf>> {
        let out = self.git(&["log", "-m", "-1", "--name-only", "--pretty=format:", commit])?;
        Ok(out
            .lines()
            .map(str::trim)
            .skip_while(|line| line.is_empty())
            .take_while(|line| !line.is_empty())
            .map(PathBuf::from)
            .collect())
    }

    /// Execute a git command in this repository and return trimmed stdout
    fn git(&self, args: &[&str]) -> Result<String> {
        git_in(&self.path, args)
    }
}

fn git_in(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .context("failed to invoke git")?;

    if !output.status.success() {
        anyhow::bail!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
