//! Compiled-bytecode canonicalization and compilation
//!
//! solc appends metadata (a CBOR blob with source hashes and compiler
//! build info) to runtime bytecode. The metadata differs between a local
//! compile and the deployed contract even when the logic is identical,
//! so deployment matching compares *trimmed* bytecode: the substring
//! between the rightmost runtime-code prologue marker and the rightmost
//! metadata-section marker for the contract's compiler version.
//!
//! Trimming is idempotent: re-trimming an already-trimmed string is a
//! no-op for every supported version band.

use anyhow::{Context, Result};
use semver::Version;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

/// Runtime-code prologue for solc >= 0.4.22 (`PUSH1 0x80 PUSH1 0x40 MSTORE`)
const PROLOGUE_0_4_22: &str = "6080604052";
/// Runtime-code prologue for 0.4.7 <= solc < 0.4.22 (`PUSH1 0x60 PUSH1 0x40 MSTORE`)
const PROLOGUE_0_4_7: &str = "6060604052";
/// Metadata-section marker for solc >= 0.6.0
const TRAILER_0_6_0: &str = "a264697066735822";
/// Metadata-section marker for 0.4.22 <= solc < 0.6.0
const TRAILER_0_4_22: &str = "a165627a7a72305820";

/// Trim compiler metadata from hex runtime bytecode
///
/// Three version bands apply. Versions below 0.4.7 are unsupported and
/// pass through unchanged; the expected outcome for them is simply no
/// match. A missing prologue keeps the string start; a missing trailer
/// keeps to end-of-string.
pub fn trim_bytecode(bytecode: &str, compiler_version: &Version) -> String {
    let (prologue, trailer) = match band_markers(compiler_version) {
        Some(markers) => markers,
        None => return bytecode.to_string(),
    };

    let start = bytecode.rfind(prologue).unwrap_or(0);
    let end = trailer
        .and_then(|marker| bytecode.rfind(marker))
        .filter(|&end| end >= start)
        .unwrap_or(bytecode.len());
    bytecode[start..end].to_string()
}

/// Prologue/trailer markers for a compiler version band, `None` below 0.4.7
fn band_markers(version: &Version) -> Option<(&'static str, Option<&'static str>)> {
    if *version >= Version::new(0, 6, 0) {
        Some((PROLOGUE_0_4_22, Some(TRAILER_0_6_0)))
    } else if *version >= Version::new(0, 4, 22) {
        Some((PROLOGUE_0_4_22, Some(TRAILER_0_4_22)))
    } else if *version >= Version::new(0, 4, 7) {
        Some((PROLOGUE_0_4_7, None))
    } else {
        None
    }
}

/// A compile request for one named contract at an exact compiler version
#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub source: PathBuf,
    pub contract_name: String,
    pub version: Version,
    /// `name=path` library remappings
    pub remappings: Vec<String>,
    pub optimize: bool,
    pub optimize_runs: u32,
}

/// Compiler frontend seam
///
/// `runtime_bytecode` returns the named contract's *trimmed* runtime
/// bytecode, or an error for an invalid (source, version, remapping)
/// combination. Callers treat compile failure as a non-match, never as
/// a fatal condition.
pub trait RuntimeCompiler {
    fn runtime_bytecode(&self, request: &CompileRequest) -> Result<String>;
}

/// solc subprocess frontend
///
/// The binary is expected to honor the solc-select convention of
/// selecting the compiler build via the `SOLC_VERSION` environment
/// variable.
#[derive(Debug, Clone)]
pub struct SolcCompiler {
    solc: String,
}

impl SolcCompiler {
    pub fn new(solc: &str) -> SolcCompiler {
        SolcCompiler {
            solc: solc.to_string(),
        }
    }
}

impl RuntimeCompiler for SolcCompiler {
    fn runtime_bytecode(&self, request: &CompileRequest) -> Result<String> {
        let mut command = Command::new(&self.solc);
        command
            .env("SOLC_VERSION", request.version.to_string())
            .arg("--combined-json")
            .arg("bin-runtime");
        if request.optimize {
            command
                .arg("--optimize")
                .arg("--optimize-runs")
                .arg(request.optimize_runs.to_string());
        }
        for remapping in &request.remappings {
            command.arg(remapping);
        }
        command.arg(&request.source);

        debug!(
            source = %request.source.display(),
            version = %request.version,
            "compiling contract"
        );
        let output = command
            .output()
            .with_context(|| format!("failed to invoke {}", self.solc))?;
        if !output.status.success() {
            anyhow::bail!(
                "solc {} failed on {}: {}",
                request.version,
                request.source.display(),
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let combined: Value = serde_json::from_slice(&output.stdout)
            .context("unparseable solc combined-json output")?;
        let raw = select_runtime(&combined, &request.contract_name).with_context(|| {
            format!(
                "contract {} not present in solc output for {}",
                request.contract_name,
                request.source.display()
            )
        })?;
        Ok(trim_bytecode(&raw, &request.version))
    }
}

/// Pull the named contract's `bin-runtime` out of combined-json output
///
/// Keys are `path:ContractName`; the name portion must match exactly.
fn select_runtime(combined: &Value, contract_name: &str) -> Option<String> {
    let contracts = combined.get("contracts")?.as_object()?;
    for (key, entry) in contracts {
        let name = key.rsplit(':').next().unwrap_or(key);
        if name == contract_name {
            return entry
                .get("bin-runtime")
                .and_then(Value::as_str)
                .map(|s| s.to_string());
        }
    }
    None
}
