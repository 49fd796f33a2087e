//! Exit code constants for the fleet-agent CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, invalid config, invalid command)
//! - 2: Worker process could not be spawned
//! - 3: Transport or outbound sink failure
//! - 4: Lock failure

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments, invalid configuration, or malformed command.
pub const USER_ERROR: i32 = 1;

/// Spawn failure: the worker process tree could not be created.
pub const SPAWN_FAILURE: i32 = 2;

/// Transport failure: inbound channel, outbound sink, or stream I/O broke.
pub const TRANSPORT_FAILURE: i32 = 3;

/// Lock failure: the manager lock could not be acquired or read.
pub const LOCK_FAILURE: i32 = 4;
