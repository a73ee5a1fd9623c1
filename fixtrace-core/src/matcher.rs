//! Deployment verification by exact bytecode match
//!
//! For each candidate address recorded under a contract name, compile
//! the checked-out source with the exact compiler version and optimizer
//! settings the deployment was verified with, trim both sides, and
//! compare byte-for-byte. The first candidate that matches wins and
//! short-circuits the search.
//!
//! Compile failure for one candidate (invalid source for that version or
//! remapping) is a non-match for that candidate, never fatal.

use crate::bytecode::{CompileRequest, RuntimeCompiler};
use crate::deployments::{DeploymentStore, GroundTruthSource};
use semver::Version;
use std::path::Path;
use tracing::{debug, warn};

/// A verified deployment match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    pub address: String,
    pub compiler_version: Version,
}

/// Verify a contract file against candidate deployment addresses
///
/// Candidates are tried in recorded order. Returns `None` when no
/// candidate's on-chain bytecode equals the locally compiled, trimmed
/// bytecode.
pub fn verify_deployment(
    contract_name: &str,
    contract_file: &Path,
    candidates: &[String],
    remappings: &[String],
    store: &DeploymentStore,
    source: &dyn GroundTruthSource,
    compiler: &dyn RuntimeCompiler,
) -> Option<MatchOutcome> {
    for address in candidates {
        let record = match store.get_or_fetch(address, source) {
            Ok(record) => record,
            Err(e) => {
                warn!(address, contract_name, "skipping candidate, no ground truth: {e}");
                continue;
            }
        };
        let version = match record.version() {
            Ok(version) => version,
            Err(e) => {
                warn!(address, "skipping candidate: {e}");
                continue;
            }
        };

        let request = CompileRequest {
            source: contract_file.to_path_buf(),
            contract_name: record.contract_name.clone(),
            version: version.clone(),
            remappings: remappings.to_vec(),
            optimize: record.optimized,
            optimize_runs: record.optimized_runs,
        };
        let compiled = match compiler.runtime_bytecode(&request) {
            Ok(bytecode) => bytecode,
            Err(e) => {
                debug!(
                    address,
                    file = %contract_file.display(),
                    "compile failed for candidate, treating as non-match: {e}"
                );
                continue;
            }
        };

        if compiled == record.bytecode {
            return Some(MatchOutcome {
                address: address.clone(),
                compiler_version: version,
            });
        }
    }
    None
}
