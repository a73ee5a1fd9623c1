//! Fixtrace CLI - mines smart-contract repositories for fix patches and
//! verified on-chain deployments

#![deny(warnings)]

// Global invariants enforced:
// - One repository is one failure domain; a failed repository never
//   aborts the run
// - Output files are append-only and safe to resume

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fixtrace_core::bytecode::SolcCompiler;
use fixtrace_core::config::{FixtraceConfig, ResolvedConfig};
use fixtrace_core::deployments::{AddressIndex, DeploymentInfo, DeploymentStore, GroundTruthSource};
use fixtrace_core::git::GitRepo;
use fixtrace_core::metadata::NullPullRequestSource;
use fixtrace_core::records::{CONTRACT_HEADERS, PATCH_HEADERS};
use fixtrace_core::runner::{self, RunSummary};
use fixtrace_core::sink::{self, CsvSink};
use fixtrace_core::walker::{ContractDeps, DetectorSuite, PatchDeps};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "fixtrace")]
#[command(about = "Correlates smart-contract git history with on-chain deployments and static-analysis findings")]
#[command(version)]
struct Cli {
    /// Path to config file (default: auto-discover)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Number of repository workers (overrides config file)
    #[arg(long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mine repository histories for commits that introduce findings
    Patches {
        /// Repository listing CSV from the discovery stage
        #[arg(long)]
        repos: PathBuf,

        /// Output CSV; existing rows are kept and their repositories skipped
        #[arg(long, default_value = "Patches.csv")]
        out: PathBuf,
    },
    /// Match historical commits against verified on-chain deployments
    Contracts {
        /// Repository listing CSV from the discovery stage
        #[arg(long)]
        repos: PathBuf,

        /// Verified-contracts CSV mapping contract names to deployment addresses
        #[arg(long)]
        verified: PathBuf,

        /// Output CSV; existing rows are kept and their repositories skipped
        #[arg(long, default_value = "Contracts.csv")]
        out: PathBuf,

        /// Command invoked with an address to fetch deployment details as JSON
        /// (default: serve from the local deployment cache only)
        #[arg(long)]
        fetch_cmd: Option<String>,
    },
    /// Validate or show the configuration
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate a config file without running anything
    Validate,
    /// Show the resolved configuration (merged defaults + config file)
    Show,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("cannot determine working directory")?;

    let mut raw = FixtraceConfig::load(cli.config.as_deref(), &cwd)
        .context("failed to load configuration")?
        .unwrap_or_default();
    // CLI flags override config file values
    if let Some(workers) = cli.workers {
        raw.workers = Some(workers);
    }
    let config = raw.resolve(&cwd).context("failed to resolve configuration")?;

    match cli.command {
        Commands::Patches { repos, out } => {
            let _guard = init_logging(&config)?;
            run_patches(&config, &repos, &out)
        }
        Commands::Contracts {
            repos,
            verified,
            out,
            fetch_cmd,
        } => {
            let _guard = init_logging(&config)?;
            run_contracts(&config, &repos, &verified, &out, fetch_cmd)
        }
        Commands::Config { action } => match action {
            ConfigAction::Validate => {
                match cli.config {
                    Some(path) => println!("Config valid: {}", path.display()),
                    None => println!("No config file specified. Using defaults."),
                }
                Ok(())
            }
            ConfigAction::Show => {
                print_config(&config);
                Ok(())
            }
        },
    }
}

fn run_patches(config: &ResolvedConfig, repos_path: &PathBuf, out: &PathBuf) -> Result<()> {
    let repos = runner::load_repo_names(repos_path)?;
    let done = sink::done_repos(out)?;
    let sink = CsvSink::open(out, &PATCH_HEADERS)?;
    let suite = DetectorSuite::from_config(config);
    let pr_source = NullPullRequestSource;

    let bar = progress_bar(repos.len() as u64);
    let summary = runner::run_repos(config, &repos, &done, |full_name| {
        let result = (|| {
            let repo =
                GitRepo::clone_or_reset(&config.data_dir, full_name, config.clone_attempts)?;
            let deps = PatchDeps {
                config,
                suite: &suite,
                pr_source: &pr_source,
                sink: &sink,
            };
            fixtrace_core::walker::mine_patches(&repo, full_name, &deps)
        })();
        bar.inc(1);
        result
    })?;
    bar.finish_and_clear();

    report(&summary, out)
}

fn run_contracts(
    config: &ResolvedConfig,
    repos_path: &PathBuf,
    verified: &PathBuf,
    out: &PathBuf,
    fetch_cmd: Option<String>,
) -> Result<()> {
    let repos = runner::load_repo_names(repos_path)?;
    let done = sink::done_repos(out)?;
    let sink = CsvSink::open(out, &CONTRACT_HEADERS)?;
    let suite = DetectorSuite::from_config(config);
    let index = AddressIndex::load(verified)?;
    let store = DeploymentStore::open(
        &config.data_dir.join("deployments.json.zst"),
        config.fetch_retries,
        Duration::from_secs(config.fetch_backoff_secs),
    );
    let ground_truth: Box<dyn GroundTruthSource> = match fetch_cmd {
        Some(cmd) => Box::new(CommandGroundTruth { cmd }),
        None => Box::new(CacheOnlyGroundTruth),
    };
    let compiler = SolcCompiler::new(&config.solc);

    let bar = progress_bar(repos.len() as u64);
    let summary = runner::run_repos(config, &repos, &done, |full_name| {
        let result = (|| {
            let repo =
                GitRepo::clone_or_reset(&config.data_dir, full_name, config.clone_attempts)?;
            let deps = ContractDeps {
                config,
                suite: &suite,
                index: &index,
                store: &store,
                ground_truth: ground_truth.as_ref(),
                compiler: &compiler,
                sink: &sink,
            };
            fixtrace_core::walker::verify_contracts(&repo, full_name, &deps)
        })();
        bar.inc(1);
        result
    })?;
    bar.finish_and_clear();

    report(&summary, out)
}

fn report(summary: &RunSummary, out: &PathBuf) -> Result<()> {
    info!(
        processed = summary.processed,
        skipped = summary.skipped,
        failed = summary.failed,
        "run complete"
    );
    println!(
        "Processed {} repositories ({} skipped, {} failed)",
        summary.processed, summary.skipped, summary.failed
    );
    println!("Output: {}", out.display());
    if summary.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Ground truth via an external fetcher command
///
/// The command is invoked with the address as its single argument and
/// must print a JSON `DeploymentInfo` object on stdout.
struct CommandGroundTruth {
    cmd: String,
}

impl GroundTruthSource for CommandGroundTruth {
    fn fetch(&self, address: &str) -> Result<DeploymentInfo> {
        let output = Command::new(&self.cmd)
            .arg(address)
            .output()
            .with_context(|| format!("failed to invoke fetcher {}", self.cmd))?;
        if !output.status.success() {
            anyhow::bail!(
                "fetcher failed for {address}: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        serde_json::from_slice(&output.stdout)
            .with_context(|| format!("fetcher emitted invalid JSON for {address}"))
    }
}

/// Ground truth that only serves what is already cached
///
/// The store consults its cache before calling the source, so with this
/// source every uncached address is simply an unverifiable candidate.
struct CacheOnlyGroundTruth;

impl GroundTruthSource for CacheOnlyGroundTruth {
    fn fetch(&self, address: &str) -> Result<DeploymentInfo> {
        anyhow::bail!("no fetcher configured and {address} is not in the deployment cache")
    }
}

/// Durable logging: full detail to a daily file, warnings to stderr
fn init_logging(config: &ResolvedConfig) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(&config.log_dir).with_context(|| {
        format!("failed to create log directory: {}", config.log_dir.display())
    })?;
    let appender = tracing_appender::rolling::daily(&config.log_dir, "fixtrace.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        );
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(LevelFilter::WARN);
    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .init();
    Ok(guard)
}

fn progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} repositories [{elapsed_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}

fn print_config(config: &ResolvedConfig) {
    println!("Configuration:");
    println!("  workers: {}", config.workers);
    println!("  data_dir: {}", config.data_dir.display());
    println!("  log_dir: {}", config.log_dir.display());
    println!(
        "  issues_dir: {}",
        config
            .issues_dir
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    println!("  solidity_parser: {}", config.solidity_parser);
    println!("  solc: {}", config.solc);
    println!(
        "  oyente_path: {}",
        config
            .oyente_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none (oyente disabled)".to_string())
    );
    println!("  detector_timeout_secs: {}", config.detector_timeout_secs);
    println!("  fetch_retries: {}", config.fetch_retries);
    println!("  fetch_backoff_secs: {}", config.fetch_backoff_secs);
    println!("  clone_attempts: {}", config.clone_attempts);
    println!("  blacklist: {} repositories", config.blacklist.len());
}
