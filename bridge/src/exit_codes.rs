//! Stable exit codes for bridge CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Configuration was invalid or the command could not start.
pub const INVALID: i32 = 1;
/// At least one executed cell finished with an error.
pub const EXEC_FAILED: i32 = 2;
