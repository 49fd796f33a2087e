//! Container-manager lock.
//!
//! While the container manager creates, destroys or reconfigures containers
//! it holds `<lxc_path>/.manager.lock`. The dispatch loop admits no execution
//! commands while that lock is held, so no command is resolved against a
//! container that is mid-change.
//!
//! # Lock File
//!
//! The lock is created with **create_new** semantics (exclusive create) and
//! holds JSON metadata:
//! - `owner`: the lock holder (e.g., `root@HOST`)
//! - `pid`: the holder's process ID (optional)
//! - `created_at`: RFC3339 timestamp
//! - `action`: what the holder is doing
//!
//! A lock older than the configured stale threshold is ignored, so a crashed
//! holder cannot pause the agent forever.

mod guard;
mod metadata;
mod operations;

#[cfg(test)]
mod tests;

// Re-export public API
pub use guard::LockGuard;
pub use metadata::LockMetadata;
pub use operations::{LockState, acquire_lock, clear_lock, lock_state};
