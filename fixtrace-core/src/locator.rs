//! AST node location
//!
//! Given a parsed source unit and a line number, finds the smallest
//! enclosing declaration and a structural path to it. The returned node
//! is canonical: every `loc` field is stripped recursively, so the same
//! logical code produces byte-identical subtrees across commits even
//! when surrounding lines shift.
//!
//! Structural paths replace array indices with a wildcard token because
//! declaration order moves between revisions while field names do not.

use crate::solidity::SourceUnit;
use serde_json::Value;
use std::fmt;

/// Locator failure: raised at its origin, converted to skip-with-log one
/// layer up (by the detector adapters).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocateError {
    /// No declaration in the tree contains the requested line. Signals a
    /// detector/AST mismatch; the finding is unusable.
    NodeNotFound { line: u32 },
}

impl fmt::Display for LocateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocateError::NodeNotFound { line } => {
                write!(f, "no AST node encloses line {line}")
            }
        }
    }
}

impl std::error::Error for LocateError {}

/// One step in a structural path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathToken {
    /// Named object field
    Field(String),
    /// Any array index (positions shift between commits)
    AnyIndex,
}

/// Structural path from the tree root to a located node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NodePath(pub Vec<PathToken>);

impl NodePath {
    fn push_field(&mut self, name: &str) {
        self.0.push(PathToken::Field(name.to_string()));
        self.0.push(PathToken::AnyIndex);
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match token {
                PathToken::Field(name) => f.write_str(name)?,
                PathToken::AnyIndex => f.write_str("[*]")?,
            }
        }
        Ok(())
    }
}

/// A located declaration: canonical subtree plus structural path
#[derive(Debug, Clone, PartialEq)]
pub struct Located {
    pub node: Value,
    pub path: NodePath,
}

/// Declaration kinds matched directly at contract level
const DIRECT_SUBNODES: &[&str] = &[
    "StateVariableDeclaration",
    "UsingForDeclaration",
    "EventDefinition",
];

/// Declaration kinds whose members are searched individually
const MEMBER_SUBNODES: &[&str] = &["StructDefinition", "EnumDefinition"];

/// Declaration kinds with executable bodies searched statement by statement
const BODY_SUBNODES: &[&str] = &["FunctionDefinition", "ModifierDefinition"];

/// Find the smallest declaration enclosing `line`
///
/// Searches top-level contract definitions whose source range contains
/// the line, then their members: state variables, using-for directives,
/// and events match as whole declarations; struct and enum members and
/// function/modifier body statements match individually.
///
/// # Errors
///
/// [`LocateError::NodeNotFound`] when no declaration contains the line.
pub fn locate(tree: &SourceUnit, line: u32) -> Result<Located, LocateError> {
    for child in tree.children() {
        if child.get("type").and_then(Value::as_str) != Some("ContractDefinition") {
            continue;
        }
        if !contains_line(child, line) {
            continue;
        }

        let mut path = NodePath::default();
        path.push_field("children");
        path.push_field("subNodes");

        let sub_nodes = child
            .get("subNodes")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        for sub_node in sub_nodes {
            if let Some(located) = locate_in_subnode(sub_node, line, &path) {
                return Ok(located);
            }
        }
    }
    Err(LocateError::NodeNotFound { line })
}

/// Match one contract member against a line
fn locate_in_subnode(sub_node: &Value, line: u32, base: &NodePath) -> Option<Located> {
    let kind = sub_node.get("type").and_then(Value::as_str)?;

    if DIRECT_SUBNODES.contains(&kind) {
        if contains_line(sub_node, line) {
            return Some(Located {
                node: strip_loc(sub_node),
                path: base.clone(),
            });
        }
        return None;
    }

    if MEMBER_SUBNODES.contains(&kind) {
        let members = sub_node.get("members").and_then(Value::as_array)?;
        for member in members {
            if contains_line(member, line) {
                let mut path = base.clone();
                path.push_field("members");
                return Some(Located {
                    node: strip_loc(member),
                    path,
                });
            }
        }
        return None;
    }

    if BODY_SUBNODES.contains(&kind) {
        let statements = sub_node
            .get("body")
            .and_then(|body| body.get("statements"))
            .and_then(Value::as_array)?;
        for statement in statements {
            if contains_line(statement, line) {
                let mut path = base.clone();
                path.0.push(PathToken::Field("body".to_string()));
                path.push_field("statements");
                return Some(Located {
                    node: strip_loc(statement),
                    path,
                });
            }
        }
    }

    None
}

/// Name of the function whose body range encloses `line`
///
/// Used by detectors that report bare line numbers without a function
/// context. Constructors yield the `"constructor"` sentinel; an unnamed
/// fallback function yields the empty string (the file-level default
/// function). `None` when no function encloses the line.
pub fn enclosing_function_name(tree: &SourceUnit, line: u32) -> Option<String> {
    for child in tree.children() {
        if !contains_line(child, line) {
            continue;
        }
        let sub_nodes = match child.get("subNodes").and_then(Value::as_array) {
            Some(sub_nodes) => sub_nodes,
            None => continue,
        };
        for sub_node in sub_nodes {
            if sub_node.get("type").and_then(Value::as_str) == Some("FunctionDefinition")
                && contains_line(sub_node, line)
            {
                return Some(function_name(sub_node));
            }
        }
    }
    None
}

/// Resolve a function definition's name, applying the constructor and
/// default-function sentinels
pub fn function_name(node: &Value) -> String {
    match node.get("name").and_then(Value::as_str) {
        Some(name) => name.to_string(),
        None => {
            if node.get("isConstructor").and_then(Value::as_bool) == Some(true) {
                "constructor".to_string()
            } else {
                String::new()
            }
        }
    }
}

/// Whether a node's source range contains the given line
fn contains_line(node: &Value, line: u32) -> bool {
    let loc = match node.get("loc") {
        Some(loc) => loc,
        None => return false,
    };
    let start = loc
        .get("start")
        .and_then(|s| s.get("line"))
        .and_then(Value::as_u64);
    let end = loc
        .get("end")
        .and_then(|e| e.get("line"))
        .and_then(Value::as_u64);
    match (start, end) {
        (Some(start), Some(end)) => start <= u64::from(line) && u64::from(line) <= end,
        _ => false,
    }
}

/// Recursively remove `loc` fields from a subtree
pub fn strip_loc(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(strip_loc).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| key.as_str() != "loc")
                .map(|(key, val)| (key.clone(), strip_loc(val)))
                .collect(),
        ),
        other => other.clone(),
    }
}
