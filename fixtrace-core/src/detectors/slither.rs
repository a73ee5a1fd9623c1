//! Slither adapter (rule-based static checker)
//!
//! Invokes slither with a fixed allow-list of checks and JSON output.
//! A finding is retained only when every reported element belongs to the
//! file under analysis; an element sourced from an imported or vendored
//! file marks the whole finding as imported and it is discarded, so the
//! same vulnerable library vendored into many repositories is not
//! counted repeatedly.

use super::{run_with_timeout, Detector, DetectorKind};
use crate::finding::Finding;
use crate::solidity::SourceUnit;
use semver::Version;
use serde_json::Value;
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Checks the pipeline cares about; everything else is ignored
const SLITHER_CHECKS: &str = "name-reused,rtlo,shadowing-state,suicidal,uninitialized-state,\
uninitialized-storage,arbitrary-send,controlled-delegatecall,reentrancy-eth,incorrect-equality,\
locked-ether,reentrancy-no-eth,unchecked-send,reentrancy-benign,reentrancy-events";

pub struct Slither {
    timeout: Duration,
}

impl Slither {
    pub fn new(timeout: Duration) -> Slither {
        Slither { timeout }
    }
}

impl Detector for Slither {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Slither
    }

    fn run(&self, file: &Path, version: &Version, remappings: &str) -> Option<Value> {
        debug!(target: "slither", file = %file.display(), "executing slither");
        let mut command = Command::new("slither");
        command
            .env("SOLC_VERSION", version.to_string())
            .arg(file)
            .arg("--json")
            .arg("-")
            .arg("--json-types")
            .arg("detectors")
            .arg("--detect")
            .arg(SLITHER_CHECKS);
        if !remappings.is_empty() {
            command.arg("--solc-remaps").arg(remappings);
        }

        // Slither exits non-zero whenever it reports findings; only the
        // JSON success flag decides whether the output is usable.
        let output = match run_with_timeout(command, self.timeout) {
            Ok(output) => output,
            Err(e) => {
                error!(target: "slither", file = %file.display(), "slither failed: {e}");
                return None;
            }
        };
        debug!(target: "slither", "{}", String::from_utf8_lossy(&output.stdout));
        if !output.stderr.is_empty() {
            debug!(target: "slither", "{}", String::from_utf8_lossy(&output.stderr));
        }

        let parsed: Value = match serde_json::from_slice(&output.stdout) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(target: "slither", file = %file.display(), "unparseable slither output: {e}");
                return None;
            }
        };
        if parsed.get("success").and_then(Value::as_bool) != Some(true) {
            return None;
        }
        Some(parsed)
    }

    fn parse(&self, output: &Value, tree: &SourceUnit, file: &Path) -> Vec<Finding> {
        let mut findings = Vec::new();
        let detectors = match output
            .get("results")
            .and_then(|r| r.get("detectors"))
            .and_then(Value::as_array)
        {
            Some(detectors) => detectors,
            None => return findings,
        };

        for entry in detectors {
            let elements = match entry.get("elements").and_then(Value::as_array) {
                Some(elements) if !elements.is_empty() => elements,
                _ => continue,
            };

            let mut lines: Vec<u32> = Vec::new();
            let mut function_name: Option<String> = None;
            let mut contract_name: Option<String> = None;
            let mut imported = false;

            for element in elements {
                match element.get("type").and_then(Value::as_str) {
                    Some("function") => {
                        function_name = element
                            .get("name")
                            .and_then(Value::as_str)
                            .map(str::to_string);
                        contract_name = element
                            .get("type_specific_fields")
                            .and_then(|f| f.get("parent"))
                            .and_then(|p| p.get("name"))
                            .and_then(Value::as_str)
                            .map(str::to_string);
                    }
                    Some("node") => {
                        if let Some(node_lines) = element
                            .get("source_mapping")
                            .and_then(|m| m.get("lines"))
                            .and_then(Value::as_array)
                        {
                            lines.extend(
                                node_lines
                                    .iter()
                                    .filter_map(Value::as_u64)
                                    .map(|l| l as u32),
                            );
                        }
                    }
                    _ => {}
                }

                let filename_used = element
                    .get("source_mapping")
                    .and_then(|m| m.get("filename_used"))
                    .and_then(Value::as_str);
                if filename_used != Some(file.to_string_lossy().as_ref()) {
                    imported = true;
                    break;
                }
            }

            if lines.is_empty() || imported {
                continue;
            }
            let (function_name, contract_name) = match (function_name, contract_name) {
                (Some(function), Some(contract)) => (function, contract),
                _ => {
                    warn!(
                        target: "slither",
                        file = %file.display(),
                        "finding without a resolvable function element, skipping"
                    );
                    continue;
                }
            };
            let kind = match entry.get("check").and_then(Value::as_str) {
                Some(kind) => kind,
                None => continue,
            };

            match Finding::locate(
                kind,
                file.to_path_buf(),
                &contract_name,
                &function_name,
                lines,
                tree,
            ) {
                Ok(finding) => findings.push(finding),
                Err(e) => {
                    warn!(target: "slither", file = %file.display(), "unusable finding: {e}");
                }
            }
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FILE: &str = "contracts/Vault.sol";

    fn tree() -> SourceUnit {
        SourceUnit(json!({
            "type": "SourceUnit",
            "children": [{
                "type": "ContractDefinition",
                "name": "Vault",
                "loc": { "start": { "line": 1 }, "end": { "line": 12 } },
                "subNodes": [{
                    "type": "FunctionDefinition",
                    "name": "withdraw",
                    "loc": { "start": { "line": 3 }, "end": { "line": 10 } },
                    "body": {
                        "type": "Block",
                        "loc": { "start": { "line": 3 }, "end": { "line": 10 } },
                        "statements": [{
                            "type": "ExpressionStatement",
                            "expression": { "type": "FunctionCall", "name": "send" },
                            "loc": { "start": { "line": 5 }, "end": { "line": 6 } }
                        }]
                    }
                }]
            }]
        }))
    }

    fn element(kind: &str, file: &str) -> Value {
        match kind {
            "function" => json!({
                "type": "function",
                "name": "withdraw",
                "type_specific_fields": { "parent": { "name": "Vault" } },
                "source_mapping": { "filename_used": file, "lines": [3, 4, 5] }
            }),
            _ => json!({
                "type": "node",
                "source_mapping": { "filename_used": file, "lines": [5, 6] }
            }),
        }
    }

    fn output(elements: Vec<Value>) -> Value {
        json!({
            "success": true,
            "results": { "detectors": [{ "check": "reentrancy-eth", "elements": elements }] }
        })
    }

    #[test]
    fn parses_function_and_node_elements() {
        let slither = Slither::new(Duration::from_secs(1));
        let out = output(vec![element("function", FILE), element("node", FILE)]);
        let findings = slither.parse(&out, &tree(), Path::new(FILE));

        assert_eq!(findings.len(), 1);
        let finding = &findings[0];
        assert_eq!(finding.kind, "reentrancy-eth");
        assert_eq!(finding.contract, "Vault");
        assert_eq!(finding.function, "withdraw");
        assert_eq!(finding.lines, vec![5, 6]);
        assert_eq!(
            finding.path.to_string(),
            "children.[*].subNodes.[*].body.statements.[*]"
        );
    }

    #[test]
    fn imported_element_discards_the_whole_finding() {
        let slither = Slither::new(Duration::from_secs(1));
        let out = output(vec![
            element("function", FILE),
            element("node", "node_modules/zeppelin/Ownable.sol"),
        ]);
        assert!(slither.parse(&out, &tree(), Path::new(FILE)).is_empty());
    }

    #[test]
    fn finding_without_node_lines_is_skipped() {
        let slither = Slither::new(Duration::from_secs(1));
        let out = output(vec![element("function", FILE)]);
        assert!(slither.parse(&out, &tree(), Path::new(FILE)).is_empty());
    }

    #[test]
    fn missing_function_element_skips_entry_not_batch() {
        let slither = Slither::new(Duration::from_secs(1));
        let out = json!({
            "success": true,
            "results": { "detectors": [
                { "check": "locked-ether", "elements": [element("node", FILE)] },
                { "check": "reentrancy-eth",
                  "elements": [element("function", FILE), element("node", FILE)] }
            ] }
        });
        let findings = slither.parse(&out, &tree(), Path::new(FILE));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, "reentrancy-eth");
    }

    #[test]
    fn unlocatable_line_skips_finding() {
        let slither = Slither::new(Duration::from_secs(1));
        let out = json!({
            "success": true,
            "results": { "detectors": [{
                "check": "reentrancy-eth",
                "elements": [element("function", FILE), {
                    "type": "node",
                    "source_mapping": { "filename_used": FILE, "lines": [99] }
                }]
            }] }
        });
        assert!(slither.parse(&out, &tree(), Path::new(FILE)).is_empty());
    }
}
