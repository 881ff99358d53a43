//! Stable exit codes for the launcher CLI.

/// The runtime ran and shut down cleanly.
pub const OK: i32 = 0;
/// The launch failed: bad configuration, runtime init/start failure or an
/// interrupted shutdown.
pub const FAILED: i32 = 1;
/// Invalid command-line arguments; usage was printed.
pub const USAGE: i32 = 2;
