//! Exit codes of the `gaintune` binary.
//! These are part of the CLI contract; scripts driving the bench rely on them.

pub const SUCCESS: i32 = 0;
pub const UNSAFE_EPISODE: i32 = 1; // Run finished but at least one episode hit the current limit
pub const CONFIG_ERROR: i32 = 2; // Bad config or arguments
pub const CONNECTION_ERROR: i32 = 3; // Bench unreachable, auth failed, exec failed
pub const TELEMETRY_ERROR: i32 = 4; // Malformed or short telemetry
pub const INTERRUPTED: i32 = 5; // Timeout or Ctrl-C
pub const OUTPUT_ERROR: i32 = 6; // Could not write results
