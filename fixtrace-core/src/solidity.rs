//! Solidity AST front end
//!
//! Parses contract sources by invoking an external `solidity_parser`
//! process that emits a JSON AST, and exposes the handful of queries the
//! engine needs: top-level children, contract names, and the `pragma
//! solidity` version requirement.
//!
//! The engine never interprets Solidity semantics beyond locating nodes
//! and reading names; the AST stays an untyped `serde_json::Value` tree.

use anyhow::{Context, Result};
use semver::{Comparator, Version, VersionReq};
use serde_json::Value;
use std::path::Path;
use std::process::Command;

/// Minimum compiler version the pipeline supports.
///
/// Files whose pragma cannot be satisfied at or above this version are
/// skipped rather than analyzed with an untested toolchain.
fn min_supported() -> Version {
    Version::new(0, 4, 19)
}

/// A parsed Solidity source file (JSON AST from the external parser)
#[derive(Debug, Clone, PartialEq)]
pub struct SourceUnit(pub Value);

impl SourceUnit {
    /// Top-level AST children, or an empty slice when absent
    pub fn children(&self) -> &[Value] {
        self.0
            .get("children")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Names of every top-level contract definition
    pub fn contract_names(&self) -> Vec<&str> {
        self.children()
            .iter()
            .filter(|child| child.get("type").and_then(Value::as_str) == Some("ContractDefinition"))
            .filter_map(|child| child.get("name").and_then(Value::as_str))
            .collect()
    }

    /// The raw value of the `pragma solidity` directive, if present
    pub fn pragma_solidity(&self) -> Option<&str> {
        self.children().iter().find_map(|child| {
            let is_pragma =
                child.get("type").and_then(Value::as_str) == Some("PragmaDirective")
                    && child.get("name").and_then(Value::as_str) == Some("solidity");
            if is_pragma {
                child.get("value").and_then(Value::as_str)
            } else {
                None
            }
        })
    }
}

/// Parse a Solidity file by running the external parser process
///
/// # Errors
///
/// Returns an error when the parser cannot be spawned, exits non-zero,
/// or emits output that is not valid JSON. Callers treat this as a
/// per-file skip, never as a walk abort.
pub fn parse_file(parser_cmd: &str, path: &Path) -> Result<SourceUnit> {
    let output = Command::new(parser_cmd)
        .arg(path)
        .output()
        .with_context(|| format!("failed to invoke {parser_cmd}"))?;

    if !output.status.success() {
        anyhow::bail!(
            "{} failed on {}: {}",
            parser_cmd,
            path.display(),
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let value: Value = serde_json::from_slice(&output.stdout)
        .with_context(|| format!("unparseable AST for {}", path.display()))?;
    Ok(SourceUnit(value))
}

/// Select a concrete compiler version for a pragma requirement
///
/// The pragma's comparator targets are sorted ascending and the lowest
/// target that is at least the minimum supported version wins. Returns
/// `None` for a missing, unparseable, or incompatible requirement — the
/// caller skips the file.
pub fn select_solc_version(pragma: Option<&str>) -> Option<Version> {
    let raw = pragma?;
    let req = parse_pragma_req(raw)?;

    let mut targets: Vec<Version> = req.comparators.iter().map(comparator_target).collect();
    targets.sort();
    let floor = min_supported();
    targets.into_iter().find(|v| *v >= floor)
}

/// Parse a pragma version string into a `VersionReq`
///
/// Pragma ranges separate comparators with whitespace (`>=0.4.21 <0.6.0`)
/// where semver expects commas. Upper bounds are often written with no
/// space at all (`>=0.4.21<0.6.0`), so a space is reinserted before
/// every `<` first.
fn parse_pragma_req(raw: &str) -> Option<VersionReq> {
    let spaced = raw.split('<').collect::<Vec<_>>().join(" <");
    let normalized = spaced.split_whitespace().collect::<Vec<_>>().join(",");
    VersionReq::parse(&normalized).ok()
}

/// The concrete version a comparator names, with absent parts zeroed
fn comparator_target(comparator: &Comparator) -> Version {
    Version::new(
        comparator.major,
        comparator.minor.unwrap_or(0),
        comparator.patch.unwrap_or(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unit(children: Value) -> SourceUnit {
        SourceUnit(json!({ "type": "SourceUnit", "children": children }))
    }

    #[test]
    fn extracts_pragma_and_contract_names() {
        let tree = unit(json!([
            { "type": "PragmaDirective", "name": "solidity", "value": "^0.5.0" },
            { "type": "ContractDefinition", "name": "Token", "subNodes": [] },
            { "type": "ContractDefinition", "name": "Sale", "subNodes": [] }
        ]));

        assert_eq!(tree.pragma_solidity(), Some("^0.5.0"));
        assert_eq!(tree.contract_names(), vec!["Token", "Sale"]);
    }

    #[test]
    fn missing_children_is_empty_not_error() {
        let tree = SourceUnit(json!({ "type": "SourceUnit" }));
        assert!(tree.children().is_empty());
        assert!(tree.contract_names().is_empty());
        assert_eq!(tree.pragma_solidity(), None);
    }

    #[test]
    fn selects_lowest_supported_target() {
        let version = select_solc_version(Some("^0.5.2")).expect("supported");
        assert_eq!(version, Version::new(0, 5, 2));

        let version = select_solc_version(Some(">=0.4.21 <0.6.0")).expect("supported");
        assert_eq!(version, Version::new(0, 4, 21));
    }

    #[test]
    fn range_without_space_before_upper_bound() {
        let version = select_solc_version(Some(">=0.4.21<0.6.0")).expect("supported");
        assert_eq!(version, Version::new(0, 4, 21));

        let version = select_solc_version(Some(">=0.5.0<=0.6.0")).expect("supported");
        assert_eq!(version, Version::new(0, 5, 0));
    }

    #[test]
    fn rejects_versions_below_minimum() {
        assert_eq!(select_solc_version(Some("0.4.11")), None);
        assert_eq!(select_solc_version(None), None);
        assert_eq!(select_solc_version(Some("not a version")), None);
    }
}
