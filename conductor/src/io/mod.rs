//! I/O helpers for conductor commands.

pub mod config;
pub mod file_store;
pub mod memory_store;
pub mod paths;
pub mod process;
pub mod report_store;
pub mod schema;
pub mod store;
