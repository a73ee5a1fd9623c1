//! Finding identity
//!
//! A finding is a detector's report of a defect at a structural location
//! in a contract. Identity is structural: equal structural path, deep-equal
//! canonical subtree (order-insensitive for sibling lists), equal contract,
//! function, and vulnerability-kind names, and the same source file.
//! Line numbers never participate, so a finding survives line drift and
//! re-formatting across commits, and two detectors reporting the same
//! code fragment produce the *same* finding.
//!
//! Hashing is kept consistent with equality by combining sub-hashes with
//! XOR, which is commutative where equality is order-insensitive.

use crate::locator::{self, Located, LocateError, NodePath};
use crate::solidity::SourceUnit;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

/// Function-name sentinel for constructor findings
pub const CONSTRUCTOR_FUNCTION: &str = "constructor";

/// A single static-analysis finding
///
/// Immutable once constructed. `lines` is carried for reporting only and
/// is excluded from equality and hashing.
#[derive(Debug, Clone)]
pub struct Finding {
    /// Detector-independent vulnerability-kind name
    pub kind: String,
    /// Source file the finding was reported against
    pub file: PathBuf,
    pub contract: String,
    /// Empty string denotes the file-level default function,
    /// [`CONSTRUCTOR_FUNCTION`] the constructor
    pub function: String,
    /// 1-based source lines, reporting metadata only
    pub lines: Vec<u32>,
    /// Structural path from tree root to the offending node
    pub path: NodePath,
    /// Canonical subtree with all location metadata stripped
    pub node: Value,
}

impl Finding {
    /// Build a finding by locating the offending node in the tree
    ///
    /// # Errors
    ///
    /// Propagates [`LocateError::NodeNotFound`] when no declaration
    /// encloses the first reported line; the caller must skip the
    /// finding, not abort the batch.
    pub fn locate(
        kind: &str,
        file: PathBuf,
        contract: &str,
        function: &str,
        lines: Vec<u32>,
        tree: &SourceUnit,
    ) -> Result<Finding, LocateError> {
        let line = lines.first().copied().ok_or(LocateError::NodeNotFound { line: 0 })?;
        let Located { node, path } = locator::locate(tree, line)?;
        Ok(Finding {
            kind: kind.to_string(),
            file,
            contract: contract.to_string(),
            function: function.to_string(),
            lines,
            path,
            node,
        })
    }

    /// Render the reported lines as a colon-separated spec (`"12:14"`)
    pub fn line_spec(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join(":")
    }
}

impl PartialEq for Finding {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
            && deep_eq_unordered(&self.node, &other.node)
            && self.contract == other.contract
            && self.function == other.function
            && self.kind == other.kind
            && self.file == other.file
    }
}

impl Eq for Finding {}

impl Hash for Finding {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let combined = hash_one(&self.path)
            ^ canonical_hash(&self.node)
            ^ hash_one(&self.contract)
            ^ hash_one(&self.function)
            ^ hash_one(&self.kind)
            ^ hash_one(&self.file);
        state.write_u64(combined);
    }
}

fn hash_one<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Order-insensitive structural hash of a JSON value
///
/// Arrays and objects combine element hashes with XOR so that any
/// reordering equality tolerates also hashes identically.
fn canonical_hash(value: &Value) -> u64 {
    match value {
        Value::Null => 0x9e37_79b9_7f4a_7c15,
        Value::Bool(b) => hash_one(b),
        Value::Number(n) => hash_one(&n.to_string()),
        Value::String(s) => hash_one(s),
        Value::Array(items) => items
            .iter()
            .fold(0x517c_c1b7_2722_0a95, |acc, item| acc ^ canonical_hash(item)),
        Value::Object(map) => map.iter().fold(0x6c62_272e_07bb_0142, |acc, (key, val)| {
            acc ^ (hash_one(key).rotate_left(17) ^ canonical_hash(val))
        }),
    }
}

/// Deep equality over JSON values, order-insensitive for arrays
///
/// Arrays compare as multisets: same length and a one-to-one matching of
/// deep-equal elements. Objects compare key-wise. Everything else is
/// exact — no fuzzy or threshold matching.
pub fn deep_eq_unordered(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(left), Value::Array(right)) => {
            if left.len() != right.len() {
                return false;
            }
            let mut used = vec![false; right.len()];
            'outer: for item in left {
                for (i, candidate) in right.iter().enumerate() {
                    if !used[i] && deep_eq_unordered(item, candidate) {
                        used[i] = true;
                        continue 'outer;
                    }
                }
                return false;
            }
            true
        }
        (Value::Object(left), Value::Object(right)) => {
            left.len() == right.len()
                && left.iter().all(|(key, val)| {
                    right.get(key).is_some_and(|other| deep_eq_unordered(val, other))
                })
        }
        (left, right) => left == right,
    }
}

/// Cumulative seen-finding set for one repository walk
///
/// Single-writer, repository-local. Monotonically non-decreasing: there
/// is no removal, commits only grow it.
#[derive(Debug, Default)]
pub struct FindingLedger {
    seen: HashSet<Finding>,
}

impl FindingLedger {
    pub fn new() -> FindingLedger {
        FindingLedger::default()
    }

    /// Seed the ledger with the findings present at the starting state
    pub fn seed<I: IntoIterator<Item = Finding>>(&mut self, findings: I) {
        self.seen.extend(findings);
    }

    /// Record a finding; returns `true` when it was not seen before
    pub fn insert(&mut self, finding: Finding) -> bool {
        self.seen.insert(finding)
    }

    pub fn contains(&self, finding: &Finding) -> bool {
        self.seen.contains(finding)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree_with_shift(shift: u32) -> SourceUnit {
        let s = |line: u32| line + shift;
        SourceUnit(json!({
            "type": "SourceUnit",
            "children": [{
                "type": "ContractDefinition",
                "name": "Vault",
                "loc": { "start": { "line": s(1) }, "end": { "line": s(10) } },
                "subNodes": [{
                    "type": "FunctionDefinition",
                    "name": "withdraw",
                    "loc": { "start": { "line": s(2) }, "end": { "line": s(9) } },
                    "body": {
                        "type": "Block",
                        "loc": { "start": { "line": s(2) }, "end": { "line": s(9) } },
                        "statements": [{
                            "type": "ExpressionStatement",
                            "expression": { "type": "FunctionCall", "name": "send" },
                            "loc": { "start": { "line": s(4) }, "end": { "line": s(4) } }
                        }]
                    }
                }]
            }]
        }))
    }

    fn finding_at(shift: u32) -> Finding {
        Finding::locate(
            "reentrancy-eth",
            PathBuf::from("contracts/Vault.sol"),
            "Vault",
            "withdraw",
            vec![4 + shift],
            &tree_with_shift(shift),
        )
        .expect("locatable")
    }

    #[test]
    fn identity_survives_line_shift() {
        let original = finding_at(0);
        let shifted = finding_at(7);
        assert_ne!(original.lines, shifted.lines);
        assert_eq!(original, shifted);
        assert_eq!(hash_one(&original), hash_one(&shifted));
    }

    #[test]
    fn different_kinds_are_distinct() {
        let mut other = finding_at(0);
        other.kind = "unchecked-send".to_string();
        assert_ne!(finding_at(0), other);
    }

    #[test]
    fn cross_file_findings_are_distinct() {
        let mut other = finding_at(0);
        other.file = PathBuf::from("contracts/VaultV2.sol");
        assert_ne!(finding_at(0), other);
    }

    #[test]
    fn reordered_sibling_lists_stay_equal() {
        let a = json!({ "modifiers": [{ "name": "onlyOwner" }, { "name": "nonReentrant" }] });
        let b = json!({ "modifiers": [{ "name": "nonReentrant" }, { "name": "onlyOwner" }] });
        assert!(deep_eq_unordered(&a, &b));
        assert_eq!(canonical_hash(&a), canonical_hash(&b));

        let c = json!({ "modifiers": [{ "name": "onlyOwner" }] });
        assert!(!deep_eq_unordered(&a, &c));
    }

    #[test]
    fn multiset_semantics_respect_duplicates() {
        let a = json!([1, 1, 2]);
        let b = json!([1, 2, 2]);
        assert!(!deep_eq_unordered(&a, &b));
    }

    #[test]
    fn ledger_grows_monotonically() {
        let mut ledger = FindingLedger::new();
        assert!(ledger.insert(finding_at(0)));
        // Same logical finding at a shifted line is not new
        assert!(!ledger.insert(finding_at(3)));
        assert_eq!(ledger.len(), 1);

        let mut other = finding_at(0);
        other.kind = "locked-ether".to_string();
        assert!(ledger.insert(other));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn empty_line_list_is_unlocatable() {
        let result = Finding::locate(
            "reentrancy-eth",
            PathBuf::from("contracts/Vault.sol"),
            "Vault",
            "withdraw",
            vec![],
            &tree_with_shift(0),
        );
        assert!(result.is_err());
    }
}
