//! Git walk integration tests - verify correctness against real git repos
//!
//! Global test rules:
//! - Real git repos
//! - Temp directories
//! - No fixed SHAs
//! - Assert relationships only

use fixtrace_core::config::{FixtraceConfig, ResolvedConfig};
use fixtrace_core::deployments::{
    AddressIndex, DeploymentInfo, DeploymentStore, GroundTruthSource,
};
use fixtrace_core::git::GitRepo;
use fixtrace_core::metadata::NullPullRequestSource;
use fixtrace_core::records::{CONTRACT_HEADERS, PATCH_HEADERS};
use fixtrace_core::sink::{self, CsvSink};
use fixtrace_core::walker::{self, ContractDeps, DetectorSuite, PatchDeps};
use fixtrace_core::bytecode::{CompileRequest, RuntimeCompiler};
use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

/// Create a temporary git repository for testing
fn create_temp_git_repo() -> tempfile::TempDir {
    let temp_dir = tempfile::tempdir().expect("failed to create temp directory");
    let repo_path = temp_dir.path();

    // Explicit branch name for portability
    git_command(repo_path, &["init", "--initial-branch=master"]);
    git_command(repo_path, &["config", "user.name", "Test User"]);
    git_command(repo_path, &["config", "user.email", "test@example.com"]);
    // Disable commit signing (may be configured globally in some environments)
    git_command(repo_path, &["config", "commit.gpgsign", "false"]);

    temp_dir
}

/// Run a git command in the repository
fn git_command(repo_path: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(repo_path)
        .args(args)
        .output()
        .unwrap_or_else(|_| panic!("failed to run git {:?}", args));

    if !output.status.success() {
        panic!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn write_file(repo_path: &Path, rel: &str, content: &str) {
    let file_path = repo_path.join(rel);
    if let Some(parent) = file_path.parent() {
        fs::create_dir_all(parent).expect("failed to create directory");
    }
    fs::write(&file_path, content).expect("failed to write file");
}

fn git_commit(repo_path: &Path, message: &str) -> String {
    git_command(repo_path, &["add", "."]);
    git_command(repo_path, &["commit", "-m", message]);
    git_command(repo_path, &["rev-parse", "HEAD"])
}

/// Config pointing at tools that do not exist, so every external
/// invocation degrades to "no findings"
fn toolless_config(cwd: &Path) -> ResolvedConfig {
    FixtraceConfig {
        solidity_parser: Some("fixtrace-missing-parser".to_string()),
        solc: Some("fixtrace-missing-solc".to_string()),
        ..FixtraceConfig::default()
    }
    .resolve(cwd)
    .expect("resolve config")
}

#[test]
fn commits_are_listed_newest_first() {
    let tmp = create_temp_git_repo();
    let first = git_commit_with(&tmp, "contracts/A.sol", "pragma solidity ^0.5.0;", "first");
    let second = git_commit_with(&tmp, "contracts/A.sol", "pragma solidity ^0.5.1;", "second");
    let third = git_commit_with(&tmp, "contracts/B.sol", "pragma solidity ^0.5.0;", "third");

    let repo = GitRepo::open(tmp.path()).expect("open");
    let commits = repo.commits_on("master").expect("log");
    assert_eq!(commits, vec![third, second, first]);
}

fn git_commit_with(tmp: &tempfile::TempDir, rel: &str, content: &str, message: &str) -> String {
    write_file(tmp.path(), rel, content);
    git_commit(tmp.path(), message)
}

#[test]
fn changed_files_report_one_commit_only() {
    let tmp = create_temp_git_repo();
    git_commit_with(&tmp, "contracts/A.sol", "pragma solidity ^0.5.0;", "base");
    write_file(tmp.path(), "contracts/B.sol", "pragma solidity ^0.5.0;");
    write_file(tmp.path(), "README.md", "readme");
    let commit = git_commit(tmp.path(), "add B and readme");

    let repo = GitRepo::open(tmp.path()).expect("open");
    let changed = repo.changed_files(&commit).expect("changed files");
    let changed: Vec<String> = changed
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    assert_eq!(changed.len(), 2);
    assert!(changed.contains(&"contracts/B.sol".to_string()));
    assert!(changed.contains(&"README.md".to_string()));
    // The base commit's file is not attributed to this commit
    assert!(!changed.contains(&"contracts/A.sol".to_string()));
}

#[test]
fn merge_commit_changes_follow_the_primary_parent() {
    let tmp = create_temp_git_repo();
    let repo_path = tmp.path();
    git_commit_with(&tmp, "contracts/A.sol", "pragma solidity ^0.5.0;", "base");

    git_command(repo_path, &["checkout", "-b", "feature"]);
    git_commit_with(&tmp, "contracts/Feature.sol", "pragma solidity ^0.5.0;", "feature work");

    git_command(repo_path, &["checkout", "master"]);
    git_commit_with(&tmp, "contracts/Mainline.sol", "pragma solidity ^0.5.0;", "mainline work");

    git_command(repo_path, &["merge", "--no-ff", "feature", "-m", "merge feature"]);
    let merge = git_command(repo_path, &["rev-parse", "HEAD"]);

    let repo = GitRepo::open(repo_path).expect("open");
    let changed = repo.changed_files(&merge).expect("changed files");
    let changed: Vec<String> = changed
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    // Relative to the primary (mainline) parent, the merge brings in the
    // feature branch's file and nothing from mainline
    assert!(changed.contains(&"contracts/Feature.sol".to_string()));
    assert!(!changed.contains(&"contracts/Mainline.sol".to_string()));
}

#[test]
fn commits_touching_filters_by_path() {
    let tmp = create_temp_git_repo();
    let a1 = git_commit_with(&tmp, "contracts/A.sol", "pragma solidity ^0.5.0;", "a1");
    let b1 = git_commit_with(&tmp, "contracts/B.sol", "pragma solidity ^0.5.0;", "b1");
    let a2 = git_commit_with(&tmp, "contracts/A.sol", "pragma solidity ^0.5.1;", "a2");

    let repo = GitRepo::open(tmp.path()).expect("open");
    let touching = repo
        .commits_touching(Path::new("contracts/A.sol"))
        .expect("log");
    assert_eq!(touching, vec![a2.clone(), a1.clone()]);
    assert!(!touching.contains(&b1));
}

#[test]
fn default_branch_survives_detached_head() {
    let tmp = create_temp_git_repo();
    let first = git_commit_with(&tmp, "contracts/A.sol", "pragma solidity ^0.5.0;", "first");
    git_commit_with(&tmp, "contracts/A.sol", "pragma solidity ^0.5.1;", "second");

    let repo = GitRepo::open(tmp.path()).expect("open");
    assert_eq!(repo.default_branch().expect("branch"), "master");

    repo.checkout(&first).expect("detach");
    // Detached HEAD falls back to a known branch name
    assert_eq!(repo.default_branch().expect("branch"), "master");
}

#[test]
fn clean_removes_untracked_but_keeps_node_modules() {
    let tmp = create_temp_git_repo();
    git_commit_with(&tmp, "contracts/A.sol", "pragma solidity ^0.5.0;", "base");
    write_file(tmp.path(), "build/artifact.json", "{}");
    write_file(tmp.path(), "node_modules/dep/index.js", "{}");

    let repo = GitRepo::open(tmp.path()).expect("open");
    repo.clean().expect("clean");
    assert!(!tmp.path().join("build/artifact.json").exists());
    assert!(tmp.path().join("node_modules/dep/index.js").exists());

    // The tracked tree itself is untouched
    let remaining: Vec<String> = walkdir::WalkDir::new(tmp.path())
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().strip_prefix(tmp.path()).expect("prefix").to_string_lossy().into_owned())
        .filter(|p| !p.starts_with(".git") && !p.starts_with("node_modules"))
        .collect();
    assert_eq!(remaining, vec!["contracts/A.sol".to_string()]);
}

#[test]
fn reset_restores_tracked_modifications() {
    let workdir = tempfile::tempdir().expect("tempdir");
    let repo_dir = workdir.path().join("vault");
    fs::create_dir_all(&repo_dir).expect("mkdir");
    git_command(&repo_dir, &["init", "--initial-branch=master"]);
    git_command(&repo_dir, &["config", "user.name", "Test User"]);
    git_command(&repo_dir, &["config", "user.email", "test@example.com"]);
    git_command(&repo_dir, &["config", "commit.gpgsign", "false"]);
    write_file(&repo_dir, "contracts/A.sol", "pragma solidity ^0.5.0;");
    git_commit(&repo_dir, "base");

    // Dirty the working tree, then reuse the existing clone
    write_file(&repo_dir, "contracts/A.sol", "corrupted");
    let repo = GitRepo::clone_or_reset(workdir.path(), "acme/vault", 1).expect("reuse");
    let content = fs::read_to_string(repo.path().join("contracts/A.sol")).expect("read");
    assert_eq!(content, "pragma solidity ^0.5.0;");
}

#[test]
fn mining_without_tools_walks_cleanly_and_emits_nothing() {
    let tmp = create_temp_git_repo();
    git_commit_with(&tmp, "contracts/A.sol", "pragma solidity ^0.5.0;", "base");
    git_commit_with(&tmp, "contracts/A.sol", "pragma solidity ^0.5.1;", "touch A");
    git_commit_with(&tmp, "test/Ignored.sol", "pragma solidity ^0.5.0;", "test-only change");

    let out_dir = tempfile::tempdir().expect("tempdir");
    let config = toolless_config(out_dir.path());
    let suite = DetectorSuite::from_config(&config);
    let out = out_dir.path().join("Patches.csv");
    let sink = CsvSink::open(&out, &PATCH_HEADERS).expect("sink");

    let repo = GitRepo::open(tmp.path()).expect("open");
    let deps = PatchDeps {
        config: &config,
        suite: &suite,
        pr_source: &NullPullRequestSource,
        sink: &sink,
    };
    walker::mine_patches(&repo, "acme/vault", &deps).expect("walk");

    // Unparseable files degrade to no findings, so no rows beyond the header
    let rows = sink::read_rows(&out, &PATCH_HEADERS).expect("read");
    assert!(rows.is_empty());
    // The walk leaves the repo back on its default branch
    let branch = git_command(tmp.path(), &["symbolic-ref", "--short", "HEAD"]);
    assert_eq!(branch, "master");
}

struct NoSource;

impl GroundTruthSource for NoSource {
    fn fetch(&self, address: &str) -> anyhow::Result<DeploymentInfo> {
        anyhow::bail!("no ground truth for {address}")
    }
}

struct NoCompiler;

impl RuntimeCompiler for NoCompiler {
    fn runtime_bytecode(&self, _request: &CompileRequest) -> anyhow::Result<String> {
        anyhow::bail!("compiler unavailable")
    }
}

#[test]
fn verification_without_candidates_emits_nothing() {
    let tmp = create_temp_git_repo();
    git_commit_with(&tmp, "contracts/A.sol", "pragma solidity ^0.5.0;", "base");

    let out_dir = tempfile::tempdir().expect("tempdir");
    let config = toolless_config(out_dir.path());
    let suite = DetectorSuite::from_config(&config);
    let out = out_dir.path().join("Contracts.csv");
    let sink = CsvSink::open(&out, &CONTRACT_HEADERS).expect("sink");
    let store = DeploymentStore::open(
        &out_dir.path().join("deployments.json.zst"),
        1,
        Duration::from_millis(0),
    );

    let repo = GitRepo::open(tmp.path()).expect("open");
    let deps = ContractDeps {
        config: &config,
        suite: &suite,
        index: &AddressIndex::default(),
        store: &store,
        ground_truth: &NoSource,
        compiler: &NoCompiler,
        sink: &sink,
    };
    walker::verify_contracts(&repo, "acme/vault", &deps).expect("walk");

    let rows = sink::read_rows(&out, &CONTRACT_HEADERS).expect("read");
    assert!(rows.is_empty());
}
