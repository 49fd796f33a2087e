//! Filesystem watches.
//!
//! `WatchRegistry` keeps a modification-time snapshot per watched path and
//! reports differences on each poll.

use crate::error::{AgentError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchAction {
    Created,
    Modified,
    Deleted,
}

impl WatchAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchAction::Created => "created",
            WatchAction::Modified => "modified",
            WatchAction::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub action: WatchAction,
}

pub trait FsWatcher {
    /// Changes since the previous poll.
    fn poll(&mut self) -> Result<Vec<WatchEvent>>;

    fn add_watch(&mut self, path: &Path) -> Result<()>;

    /// Returns whether the path was being watched.
    fn remove_watch(&mut self, path: &Path) -> Result<bool>;

    fn watched(&self) -> Vec<PathBuf>;
}

#[derive(Debug, Default)]
pub struct WatchRegistry {
    snapshots: BTreeMap<PathBuf, Option<SystemTime>>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

impl FsWatcher for WatchRegistry {
    fn poll(&mut self) -> Result<Vec<WatchEvent>> {
        let mut events = Vec::new();
        for (path, seen) in self.snapshots.iter_mut() {
            let current = modified(path);
            let action = match (*seen, current) {
                (None, Some(_)) => Some(WatchAction::Created),
                (Some(_), None) => Some(WatchAction::Deleted),
                (Some(before), Some(now)) if before != now => Some(WatchAction::Modified),
                _ => None,
            };
            if let Some(action) = action {
                events.push(WatchEvent {
                    path: path.clone(),
                    action,
                });
                *seen = current;
            }
        }
        Ok(events)
    }

    fn add_watch(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(AgentError::UserError(format!(
                "cannot watch '{}': path does not exist",
                path.display()
            )));
        }
        self.snapshots.insert(path.to_path_buf(), modified(path));
        Ok(())
    }

    fn remove_watch(&mut self, path: &Path) -> Result<bool> {
        Ok(self.snapshots.remove(path).is_some())
    }

    fn watched(&self) -> Vec<PathBuf> {
        self.snapshots.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn touch_later(path: &Path) {
        // Make sure the new mtime differs on filesystems with coarse timestamps.
        let later = SystemTime::now() + Duration::from_secs(5);
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(later).unwrap();
    }

    #[test]
    fn reports_modification_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.conf");
        std::fs::write(&path, "a").unwrap();

        let mut watcher = WatchRegistry::new();
        watcher.add_watch(&path).unwrap();
        assert!(watcher.poll().unwrap().is_empty());

        touch_later(&path);
        let events = watcher.poll().unwrap();
        assert_eq!(
            events,
            vec![WatchEvent {
                path: path.clone(),
                action: WatchAction::Modified
            }]
        );
        assert!(watcher.poll().unwrap().is_empty());
    }

    #[test]
    fn reports_deletion() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.txt");
        std::fs::write(&path, "x").unwrap();

        let mut watcher = WatchRegistry::new();
        watcher.add_watch(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let events = watcher.poll().unwrap();
        assert_eq!(events[0].action, WatchAction::Deleted);
        assert_eq!(events[0].action.as_str(), "deleted");
    }

    #[test]
    fn add_and_remove() {
        let dir = TempDir::new().unwrap();
        let mut watcher = WatchRegistry::new();

        let err = watcher.add_watch(&dir.path().join("missing")).unwrap_err();
        assert!(err.to_string().contains("does not exist"));

        watcher.add_watch(dir.path()).unwrap();
        assert_eq!(watcher.watched(), vec![dir.path().to_path_buf()]);
        assert!(watcher.remove_watch(dir.path()).unwrap());
        assert!(!watcher.remove_watch(dir.path()).unwrap());
        assert!(watcher.watched().is_empty());
    }
}
