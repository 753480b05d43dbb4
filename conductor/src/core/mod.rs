//! Deterministic, pure logic shared by the conductor.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod classifier;
pub mod complexity;
pub mod invariants;
pub mod naming;
pub mod plan;
pub mod selector;
pub mod transitions;
pub mod types;
