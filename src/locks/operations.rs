//! Lock acquisition, inspection, and clearing.

use super::guard::LockGuard;
use super::metadata::LockMetadata;
use crate::error::{AgentError, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Observed state of a lock file.
#[derive(Debug, Clone)]
pub enum LockState {
    Unlocked,
    /// Held; metadata is `None` when the file exists but cannot be parsed.
    Held(Option<LockMetadata>),
    /// Present but older than the stale threshold; treated as unlocked.
    Stale(LockMetadata),
}

impl LockState {
    pub fn is_locked(&self) -> bool {
        matches!(self, LockState::Held(_))
    }
}

/// Acquire a lock file using create_new semantics.
///
/// Fails with `AgentError::Lock` if the file already exists.
pub fn acquire_lock(lock_path: &Path, action: &str) -> Result<LockGuard> {
    if let Some(parent) = lock_path.parent()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| {
            AgentError::Lock(format!(
                "failed to create lock directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                let existing = match LockMetadata::from_file(lock_path) {
                    Ok(meta) => format!("\nLock: {} ({})", lock_path.display(), meta),
                    Err(_) => format!("\nLock: {}", lock_path.display()),
                };
                AgentError::Lock(format!("lock is held by another process{}", existing))
            } else {
                AgentError::Lock(format!(
                    "failed to acquire lock '{}': {}",
                    lock_path.display(),
                    e
                ))
            }
        })?;

    let metadata = LockMetadata::new(action);
    let json = metadata.to_json()?;
    file.write_all(json.as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|e| {
            let _ = fs::remove_file(lock_path);
            AgentError::Lock(format!("failed to write lock metadata: {}", e))
        })?;

    Ok(LockGuard::new(lock_path.to_path_buf(), metadata))
}

/// Inspect the lock at `lock_path`.
pub fn lock_state(lock_path: &Path, stale_secs: u64) -> LockState {
    if !lock_path.exists() {
        return LockState::Unlocked;
    }
    match LockMetadata::from_file(lock_path) {
        Ok(meta) if meta.is_stale(stale_secs) => LockState::Stale(meta),
        Ok(meta) => LockState::Held(Some(meta)),
        // Being written right now, or written by a tool we don't know.
        Err(_) => LockState::Held(None),
    }
}

/// Remove the lock file; returns `false` if there was none.
pub fn clear_lock(lock_path: &Path) -> Result<bool> {
    match fs::remove_file(lock_path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(AgentError::Lock(format!(
            "failed to clear lock '{}': {}",
            lock_path.display(),
            e
        ))),
    }
}
