//! Ownership of a held manager lock.

use super::metadata::LockMetadata;
use crate::error::{AgentError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// A manager lock held by this process; the file goes away with the guard.
///
/// The file is removed only while it still carries the metadata written at
/// acquisition. If an operator force-cleared it and someone else took the
/// lock since, their file is left alone.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    held: LockMetadata,
    released: bool,
}

impl LockGuard {
    pub(super) fn new(path: PathBuf, held: LockMetadata) -> Self {
        Self {
            path,
            held,
            released: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &LockMetadata {
        &self.held
    }

    /// Whether the file on disk is still the one this guard wrote.
    pub fn is_owned(&self) -> bool {
        LockMetadata::from_file(&self.path).is_ok_and(|on_disk| {
            on_disk.pid == self.held.pid && on_disk.created_at == self.held.created_at
        })
    }

    /// Give the lock up now. Returns `false` when the file was already gone
    /// or had been taken over by another holder.
    pub fn release(mut self) -> Result<bool> {
        self.released = true;
        self.remove_if_owned()
    }

    fn remove_if_owned(&self) -> Result<bool> {
        if !self.is_owned() {
            return Ok(false);
        }
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AgentError::Lock(format!(
                "failed to release lock '{}': {}",
                self.path.display(),
                e
            ))),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match self.remove_if_owned() {
            Ok(true) => {
                tracing::debug!(path = %self.path.display(), action = %self.held.action, "manager lock released")
            }
            Ok(false) => {
                tracing::warn!(path = %self.path.display(), "manager lock was cleared or taken over while held")
            }
            Err(e) => tracing::warn!(error = %e, "manager lock left behind"),
        }
    }
}
