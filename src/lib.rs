//! rampart - iptables policy compiler for container hosts
//!
//! Compiles host-level packet-filtering policy from independent
//! access-control sources (admin allowlist, entity grants, address grants,
//! public ports) and live container topology into one ordered
//! iptables-restore document, then applies it atomically.
//!
//! # Architecture
//!
//! - [`core`] - The compilation pipeline: source normalization, topology
//!   reduction, grant reconciliation, rule rendering, apply gateway
//! - [`audit`] - JSON-lines audit trail of compile/apply operations
//! - [`validators`] - Port token validation for the untrusted sources
//! - [`config`] - Explicit engine configuration and layout bootstrapping
//! - [`utils`] - State directory and PATH helpers
//!
//! # Safety Model
//!
//! - Default-deny INPUT, gated on a non-empty admin allowlist: a run that
//!   resolves zero admin entries aborts before anything is written
//! - Malformed grant entries are dropped, never widened
//! - The compiled ruleset is persisted atomically (temp file + rename)
//!   before the restore mechanism ever sees it
//! - Deterministic rendering: identical inputs produce byte-identical
//!   rulesets

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use core::error::{Error, Result};
pub use core::pipeline::Engine;
pub use core::ruleset::{CompiledRuleset, PolicyModel};
