//! Detector adapters
//!
//! Normalize two heterogeneous external analyzers into the common
//! [`Finding`](crate::finding::Finding) representation. Both adapters
//! are fail-open: a non-zero exit, malformed output, or a timeout is the
//! no-findings sentinel (`run` returns `None`), logged and never raised
//! across the adapter boundary. Individual malformed result entries are
//! skipped without aborting the batch.

pub mod oyente;
pub mod slither;

pub use oyente::Oyente;
pub use slither::Slither;

use crate::finding::Finding;
use crate::solidity::SourceUnit;
use anyhow::{Context, Result};
use semver::Version;
use serde_json::Value;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

/// Which analyzer produced a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DetectorKind {
    Slither,
    Oyente,
}

impl DetectorKind {
    pub fn name(&self) -> &'static str {
        match self {
            DetectorKind::Slither => "Slither",
            DetectorKind::Oyente => "Oyente",
        }
    }
}

/// External analyzer seam
///
/// `run` invokes the tool against one file with the target compiler
/// version selected via the environment; `None` means no usable output.
/// `parse` turns raw output into findings, discarding any finding whose
/// source location does not belong to `file` (imported-library noise).
pub trait Detector {
    fn kind(&self) -> DetectorKind;

    fn run(&self, file: &Path, version: &Version, remappings: &str) -> Option<Value>;

    fn parse(&self, output: &Value, tree: &SourceUnit, file: &Path) -> Vec<Finding>;
}

/// Run a command with a bounded allowance, killing it on expiry
///
/// Output pipes are drained on helper threads so a chatty tool cannot
/// deadlock against a full pipe buffer.
pub(crate) fn run_with_timeout(mut command: Command, timeout: Duration) -> Result<Output> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("failed to spawn external tool")?;

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let stdout_reader = std::thread::spawn(move || drain(stdout_pipe));
    let stderr_reader = std::thread::spawn(move || drain(stderr_pipe));

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().context("failed to poll external tool")? {
            let stdout = stdout_reader.join().unwrap_or_default();
            let stderr = stderr_reader.join().unwrap_or_default();
            return Ok(Output {
                status,
                stdout,
                stderr,
            });
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            anyhow::bail!("external tool timed out after {}s", timeout.as_secs());
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn drain<R: Read>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    buf
}
