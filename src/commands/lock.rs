//! Implementation of the `fleet-agent lock` commands.
//!
//! The container manager normally owns the lock; these commands let an
//! operator see who holds it, clear a leftover file, or hold it by hand to
//! pause admissions during maintenance.

use crate::cli::{LockAction, LockClearArgs, LockCommand, LockHoldArgs};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::exit_codes;
use crate::locks::{self, LockState};
use std::thread;
use std::time::Duration;

pub fn dispatch_lock(lock_cmd: LockCommand, config: &AgentConfig) -> Result<i32> {
    match lock_cmd.action {
        LockAction::Status => cmd_lock_status(config),
        LockAction::Clear(args) => cmd_lock_clear(args, config),
        LockAction::Hold(args) => cmd_lock_hold(args, config),
    }
}

fn cmd_lock_status(config: &AgentConfig) -> Result<i32> {
    let path = config.manager_lock_path();
    match locks::lock_state(&path, config.manager_lock_stale_secs) {
        LockState::Unlocked => println!("Unlocked ({})", path.display()),
        LockState::Held(Some(meta)) => println!("Locked: {}", meta),
        LockState::Held(None) => println!("Locked: {} (unreadable metadata)", path.display()),
        LockState::Stale(meta) => println!("Stale (ignored): {}", meta),
    }
    Ok(exit_codes::SUCCESS)
}

fn cmd_lock_clear(args: LockClearArgs, config: &AgentConfig) -> Result<i32> {
    let path = config.manager_lock_path();
    let state = locks::lock_state(&path, config.manager_lock_stale_secs);

    if state.is_locked() && !args.force {
        return Err(AgentError::Lock(format!(
            "lock '{}' is held and not stale; use --force to clear it",
            path.display()
        )));
    }

    if locks::clear_lock(&path)? {
        tracing::info!(path = %path.display(), "manager lock cleared");
        println!("Cleared {}", path.display());
    } else {
        println!("No lock at {}", path.display());
    }
    Ok(exit_codes::SUCCESS)
}

fn cmd_lock_hold(args: LockHoldArgs, config: &AgentConfig) -> Result<i32> {
    let path = config.manager_lock_path();
    let _guard = locks::acquire_lock(&path, "hold")?;
    println!("Holding {} for {}s", path.display(), args.secs);
    thread::sleep(Duration::from_secs(args.secs));
    Ok(exit_codes::SUCCESS)
}
