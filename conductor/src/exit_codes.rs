//! Stable exit codes for conductor CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid input or config, or citation violations were found.
pub const INVALID: i32 = 1;
/// A run completed with a failed result.
pub const RUN_FAILED: i32 = 2;
/// A run stopped on a budget or limit violation.
pub const BUDGET_EXCEEDED: i32 = 3;
