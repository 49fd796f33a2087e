//! Resolving the worker pid beneath the spawned shell.
//!
//! The spawned child is `/bin/sh -c ...`; the process doing the work is
//! usually its child. Resolution asks `/proc` for the shell's children with a
//! bounded number of retries.

use std::process::Child;
use std::thread;
use std::time::Duration;

/// Outcome of pid resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidResolution {
    /// The shell's child was found.
    Grandchild(u32),
    /// The shell exited first; it was the worker.
    ChildExited,
    /// Attempts ran out with the shell alive and childless.
    Unresolved,
}

impl PidResolution {
    /// Pid to report and signal, falling back to the immediate child.
    pub fn or_child(self, child_pid: u32) -> u32 {
        match self {
            PidResolution::Grandchild(pid) => pid,
            PidResolution::ChildExited | PidResolution::Unresolved => child_pid,
        }
    }
}

/// Children of `pid`, oldest first.
pub fn children_of(pid: u32) -> Vec<u32> {
    let path = format!("/proc/{pid}/task/{pid}/children");
    match std::fs::read_to_string(&path) {
        Ok(content) => content
            .split_whitespace()
            .filter_map(|p| p.parse().ok())
            .collect(),
        Err(_) => scan_for_children(pid),
    }
}

/// Fallback for kernels without the `children` file.
fn scan_for_children(parent: u32) -> Vec<u32> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };

    let mut children: Vec<u32> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        .filter(|pid| {
            std::fs::read_to_string(format!("/proc/{pid}/stat"))
                .ok()
                .and_then(|stat| parent_from_stat(&stat))
                == Some(parent)
        })
        .collect();
    children.sort_unstable();
    children
}

/// Parent pid field of a `/proc/<pid>/stat` line.
fn parent_from_stat(stat: &str) -> Option<u32> {
    // comm may contain spaces and parentheses; fields resume after the last ')'.
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    fields.next()?;
    fields.next()?.parse().ok()
}

/// Find the process doing the work for `child`.
pub fn resolve_worker_pid(child: &mut Child, attempts: u32, interval: Duration) -> PidResolution {
    let child_pid = child.id();

    for attempt in 0..attempts.max(1) {
        if let Some(&pid) = children_of(child_pid).last() {
            return PidResolution::Grandchild(pid);
        }
        if matches!(child.try_wait(), Ok(Some(_))) {
            return PidResolution::ChildExited;
        }
        if attempt + 1 < attempts {
            thread::sleep(interval);
        }
    }

    PidResolution::Unresolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    #[test]
    fn parses_parent_from_stat() {
        let stat = "1234 (my (weird) proc) S 77 1234 1234 0 -1 4194560";
        assert_eq!(parent_from_stat(stat), Some(77));
        assert_eq!(parent_from_stat("garbage"), None);
    }

    #[test]
    fn finds_worker_under_shell() {
        // Two commands keep the shell from exec'ing the sleep directly.
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg("sleep 5; true")
            .stdout(Stdio::null())
            .spawn()
            .unwrap();

        let resolution = resolve_worker_pid(&mut child, 50, Duration::from_millis(10));
        let PidResolution::Grandchild(pid) = resolution else {
            panic!("expected grandchild, got {:?}", resolution);
        };
        assert_ne!(pid, child.id());
        assert!(children_of(child.id()).contains(&pid));

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn exited_child_is_its_own_worker() {
        let mut child = Command::new("/bin/sh").arg("-c").arg("exit 0").spawn().unwrap();
        child.wait().unwrap();

        let resolution = resolve_worker_pid(&mut child, 3, Duration::from_millis(1));
        assert_eq!(resolution, PidResolution::ChildExited);
        assert_eq!(resolution.or_child(child.id()), child.id());
    }

    #[test]
    fn unresolved_falls_back_to_child() {
        assert_eq!(PidResolution::Unresolved.or_child(42), 42);
        assert_eq!(PidResolution::Grandchild(7).or_child(42), 7);
    }
}
