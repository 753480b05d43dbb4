//! Stable exit codes for conductor CLI commands.

/// Command succeeded; for `run`/`resume` the objective was accepted.
pub const OK: i32 = 0;
/// Command failed: invalid plan, config, store or arguments, or validation kept failing.
pub const INVALID: i32 = 1;
/// Improvement cycles exhausted below the satisfaction threshold (partial success).
pub const PARTIAL: i32 = 2;
/// Pending tasks remain that can never run.
pub const STALLED: i32 = 3;
/// The run was cancelled (Ctrl-C) before reaching a terminal outcome.
pub const CANCELLED: i32 = 4;
