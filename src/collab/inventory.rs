//! Container inventory.

use crate::error::{AgentError, Result};
use crate::exec::{ContainerTarget, ExecutionTarget};
use crate::locks::lock_state;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Relative to a container's rootfs; holds the id the fleet addresses it by.
const CONTAINER_ID_FILE: &str = "etc/fleet-agent/id";

/// Read-mostly view of the containers on this host.
pub trait ContainerInventory: Send + Sync {
    /// A container whose id or name equals `id`.
    fn find_target_by_id(&self, id: &str) -> Option<ExecutionTarget>;

    /// Whether the container manager currently holds its lock.
    fn is_locked(&self) -> bool;

    /// Rescan containers; returns how many were found.
    fn refresh(&self) -> Result<usize>;

    fn container_ids(&self) -> Vec<String>;
}

/// Inventory of an LXC tree: every `<lxc_path>/<name>/rootfs` is a container.
#[derive(Debug)]
pub struct LxcInventory {
    lxc_path: PathBuf,
    attach_program: String,
    lock_path: PathBuf,
    lock_stale_secs: u64,
    containers: RwLock<Vec<ContainerTarget>>,
}

impl LxcInventory {
    pub fn new(
        lxc_path: impl Into<PathBuf>,
        attach_program: impl Into<String>,
        lock_path: impl Into<PathBuf>,
        lock_stale_secs: u64,
    ) -> Self {
        Self {
            lxc_path: lxc_path.into(),
            attach_program: attach_program.into(),
            lock_path: lock_path.into(),
            lock_stale_secs,
            containers: RwLock::new(Vec::new()),
        }
    }

    fn scan(&self) -> Result<Vec<ContainerTarget>> {
        if !self.lxc_path.exists() {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&self.lxc_path).map_err(|e| {
            AgentError::Io(format!(
                "failed to read container directory '{}': {}",
                self.lxc_path.display(),
                e
            ))
        })?;

        let mut containers: Vec<ContainerTarget> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_str()?.to_string();
                let rootfs = entry.path().join("rootfs");
                rootfs.is_dir().then(|| ContainerTarget {
                    id: read_container_id(&rootfs).unwrap_or_else(|| name.clone()),
                    name,
                    rootfs,
                    attach_program: self.attach_program.clone(),
                })
            })
            .collect();
        containers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(containers)
    }
}

fn read_container_id(rootfs: &Path) -> Option<String> {
    let id = std::fs::read_to_string(rootfs.join(CONTAINER_ID_FILE)).ok()?;
    let id = id.trim();
    (!id.is_empty()).then(|| id.to_string())
}

impl ContainerInventory for LxcInventory {
    fn find_target_by_id(&self, id: &str) -> Option<ExecutionTarget> {
        let containers = self
            .containers
            .read()
            .unwrap_or_else(|poison| poison.into_inner());
        containers
            .iter()
            .find(|c| c.id == id || c.name == id)
            .cloned()
            .map(ExecutionTarget::Contained)
    }

    fn is_locked(&self) -> bool {
        lock_state(&self.lock_path, self.lock_stale_secs).is_locked()
    }

    fn refresh(&self) -> Result<usize> {
        let scanned = self.scan()?;
        let count = scanned.len();
        *self
            .containers
            .write()
            .unwrap_or_else(|poison| poison.into_inner()) = scanned;
        Ok(count)
    }

    fn container_ids(&self) -> Vec<String> {
        self.containers
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .iter()
            .map(|c| c.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locks::acquire_lock;
    use tempfile::TempDir;

    fn make_container(root: &Path, name: &str, id: Option<&str>) {
        let rootfs = root.join(name).join("rootfs");
        std::fs::create_dir_all(rootfs.join("etc/fleet-agent")).unwrap();
        if let Some(id) = id {
            std::fs::write(rootfs.join(CONTAINER_ID_FILE), format!("{}\n", id)).unwrap();
        }
    }

    fn inventory(root: &Path) -> LxcInventory {
        LxcInventory::new(root, "lxc-attach", root.join(".manager.lock"), 600)
    }

    #[test]
    fn refresh_discovers_containers() {
        let dir = TempDir::new().unwrap();
        make_container(dir.path(), "web01", Some("7f3a-uuid"));
        make_container(dir.path(), "db01", None);
        std::fs::create_dir_all(dir.path().join("not-a-container")).unwrap();

        let inv = inventory(dir.path());
        assert_eq!(inv.refresh().unwrap(), 2);
        assert_eq!(inv.container_ids(), vec!["db01", "7f3a-uuid"]);
    }

    #[test]
    fn lookup_by_id_or_name() {
        let dir = TempDir::new().unwrap();
        make_container(dir.path(), "web01", Some("7f3a-uuid"));
        let inv = inventory(dir.path());
        inv.refresh().unwrap();

        let Some(ExecutionTarget::Contained(target)) = inv.find_target_by_id("7f3a-uuid") else {
            panic!("container not found by id");
        };
        assert_eq!(target.name, "web01");
        assert_eq!(target.rootfs, dir.path().join("web01/rootfs"));
        assert!(inv.find_target_by_id("web01").is_some());
        assert!(inv.find_target_by_id("host-1").is_none());
    }

    #[test]
    fn lookup_uses_last_refresh() {
        let dir = TempDir::new().unwrap();
        let inv = inventory(dir.path());
        inv.refresh().unwrap();
        make_container(dir.path(), "late", None);

        assert!(inv.find_target_by_id("late").is_none());
        inv.refresh().unwrap();
        assert!(inv.find_target_by_id("late").is_some());
    }

    #[test]
    fn missing_lxc_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let inv = inventory(&dir.path().join("absent"));
        assert_eq!(inv.refresh().unwrap(), 0);
    }

    #[test]
    fn locked_while_manager_lock_held() {
        let dir = TempDir::new().unwrap();
        let inv = inventory(dir.path());
        assert!(!inv.is_locked());

        let guard = acquire_lock(&dir.path().join(".manager.lock"), "clone").unwrap();
        assert!(inv.is_locked());
        drop(guard);
        assert!(!inv.is_locked());
    }
}
