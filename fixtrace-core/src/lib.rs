//! Fixtrace core library - correlates smart-contract git history with
//! on-chain deployments and static-analysis findings

#![deny(warnings)]

// Global invariants enforced in this crate:
// - A finding's identity is structural: line numbers and formatting never affect it
// - The per-repository seen-finding set only grows during a walk
// - Deployment records are write-once; a cached address is never refetched
// - External tool failure degrades to "no findings", never aborts a walk
// - No global mutable state; configuration is passed explicitly

pub mod bytecode;
pub mod config;
pub mod deployments;
pub mod detectors;
pub mod finding;
pub mod git;
pub mod locator;
pub mod matcher;
pub mod metadata;
pub mod records;
pub mod runner;
pub mod sink;
pub mod solidity;
pub mod walker;

pub use config::ResolvedConfig;
pub use finding::{Finding, FindingLedger};
pub use git::GitRepo;
pub use records::{ContractRecord, PatchRecord, RepoRecord};
