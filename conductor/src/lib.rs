//! Objective-driven task orchestration.
//!
//! This crate turns an objective into a dependency-ordered plan, runs the plan
//! in phase-gated batches through pluggable workers, and repeats bounded
//! improvement cycles until a completeness score clears its threshold. The
//! architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (plan model, invariants, selection,
//!   transitions, complexity heuristics). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (task stores, config, process
//!   execution, reports). Isolated to enable substitution in tests.
//! - **[`agents`]**: Capability traits the manager calls, plus bundled
//!   implementations.
//!
//! Orchestration modules ([`manager`], [`dispatch`], [`improvement`],
//! [`report`], [`modes`]) coordinate core logic with I/O to implement CLI
//! commands.

pub mod agents;
pub mod core;
pub mod dispatch;
pub mod exit_codes;
pub mod improvement;
pub mod io;
pub mod logging;
pub mod manager;
pub mod modes;
pub mod report;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
