//! Oyente adapter (symbolic-execution analyzer)
//!
//! Oyente reports findings as `"file:line"` strings, sometimes nested in
//! a list when one kind occurs several times inside one function. Each
//! reference produces one finding. The tool reports no function context,
//! so the enclosing function is recovered from the AST; lines that fall
//! outside any function resolve to the `"unknown"` sentinel.

use super::{run_with_timeout, Detector, DetectorKind};
use crate::finding::Finding;
use crate::locator;
use crate::solidity::SourceUnit;
use semver::Version;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, error, warn};

pub struct Oyente {
    oyente_path: PathBuf,
    timeout: Duration,
}

impl Oyente {
    pub fn new(oyente_path: PathBuf, timeout: Duration) -> Oyente {
        Oyente {
            oyente_path,
            timeout,
        }
    }

    fn finding_from_reference(
        &self,
        kind: &str,
        contract_name: &str,
        reference: &str,
        tree: &SourceUnit,
        file: &Path,
    ) -> Option<Finding> {
        let line: u32 = match reference.split(':').nth(1).and_then(|l| l.parse().ok()) {
            Some(line) => line,
            None => {
                warn!(target: "oyente", reference, "malformed line reference, skipping");
                return None;
            }
        };
        let function = locator::enclosing_function_name(tree, line)
            .unwrap_or_else(|| "unknown".to_string());

        match Finding::locate(
            kind,
            file.to_path_buf(),
            contract_name,
            &function,
            vec![line],
            tree,
        ) {
            Ok(finding) => Some(finding),
            Err(e) => {
                warn!(target: "oyente", file = %file.display(), "unusable finding: {e}");
                None
            }
        }
    }
}

impl Detector for Oyente {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Oyente
    }

    fn run(&self, file: &Path, version: &Version, remappings: &str) -> Option<Value> {
        debug!(target: "oyente", file = %file.display(), "executing oyente");
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let mut command = Command::new("python3");
        command
            .env("SOLC_VERSION", version.to_string())
            .arg(&self.oyente_path)
            .arg("-s")
            .arg(file)
            .arg("-j")
            .arg("--web")
            .arg("--allow-paths")
            .arg(&cwd);
        if !remappings.is_empty() {
            command.arg("-rmp").arg(remappings);
        }

        let output = match run_with_timeout(command, self.timeout) {
            Ok(output) => output,
            Err(e) => {
                error!(target: "oyente", file = %file.display(), "oyente failed: {e}");
                return None;
            }
        };
        debug!(target: "oyente", "{}", String::from_utf8_lossy(&output.stdout));
        if !output.stderr.is_empty() {
            debug!(target: "oyente", "{}", String::from_utf8_lossy(&output.stderr));
        }

        match serde_json::from_slice(&output.stdout) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                error!(target: "oyente", file = %file.display(), "unparseable oyente output: {e}");
                None
            }
        }
    }

    fn parse(&self, output: &Value, tree: &SourceUnit, file: &Path) -> Vec<Finding> {
        let mut findings = Vec::new();
        let by_file = match output.as_object() {
            Some(by_file) => by_file,
            None => return findings,
        };

        for (reported_file, contracts) in by_file {
            // Results for imported files are not ours to count
            if Path::new(reported_file) != file {
                continue;
            }
            let contracts = match contracts.as_object() {
                Some(contracts) => contracts,
                None => continue,
            };
            for (contract_name, data) in contracts {
                let kinds = match data.get("vulnerabilities").and_then(Value::as_object) {
                    Some(kinds) => kinds,
                    None => continue,
                };
                for (kind, entries) in kinds {
                    let entries = match entries.as_array() {
                        Some(entries) => entries,
                        None => continue,
                    };
                    for entry in entries {
                        match entry {
                            Value::String(reference) => {
                                findings.extend(self.finding_from_reference(
                                    kind,
                                    contract_name,
                                    reference,
                                    tree,
                                    file,
                                ));
                            }
                            Value::Array(nested) => {
                                for reference in nested.iter().filter_map(Value::as_str) {
                                    findings.extend(self.finding_from_reference(
                                        kind,
                                        contract_name,
                                        reference,
                                        tree,
                                        file,
                                    ));
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
        }
        findings
    }
}
