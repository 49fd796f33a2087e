//! Execution targets: the host itself, or a named LXC container.

use crate::command::Command;
use std::ffi::CString;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{self, Stdio};

/// Numeric identity of a run-as user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIds {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

/// A container resolved from the inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerTarget {
    /// Identifier commands address the container by.
    pub id: String,
    /// LXC container name passed to the attach program.
    pub name: String,
    pub rootfs: PathBuf,
    pub attach_program: String,
}

/// Where a command's worker runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionTarget {
    Local,
    Contained(ContainerTarget),
}

impl ExecutionTarget {
    pub fn label(&self) -> &str {
        match self {
            ExecutionTarget::Local => "local",
            ExecutionTarget::Contained(c) => &c.name,
        }
    }

    /// Map a path inside the target to the corresponding host path.
    pub fn host_path(&self, path: &str) -> PathBuf {
        match self {
            ExecutionTarget::Local => PathBuf::from(path),
            ExecutionTarget::Contained(c) => c.rootfs.join(path.trim_start_matches('/')),
        }
    }

    /// Whether `dir` exists as a directory on the target. Empty means "inherit".
    pub fn check_working_directory(&self, dir: &str) -> bool {
        if dir.is_empty() {
            return true;
        }
        self.host_path(dir).is_dir()
    }

    /// Resolve a user name to numeric ids on the target.
    pub fn resolve_user(&self, name: &str) -> Option<UserIds> {
        if name.is_empty() {
            return None;
        }
        match self {
            ExecutionTarget::Local => lookup_host_user(name),
            ExecutionTarget::Contained(c) => lookup_passwd_file(&c.rootfs.join("etc/passwd"), name),
        }
    }

    /// Build the worker process for `command`, with stdout and stderr piped.
    ///
    /// The worker leads its own process group so a timeout can signal the
    /// whole tree.
    pub fn worker_command(&self, command: &Command, user: Option<&UserIds>) -> process::Command {
        let mut worker = self.shell_command(command, user);
        worker
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        worker
    }

    /// Build a detached worker for a background command; nothing is piped.
    pub fn daemon_command(&self, command: &Command, user: Option<&UserIds>) -> process::Command {
        let mut worker = self.shell_command(command, user);
        worker
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0);
        worker
    }

    fn shell_command(&self, command: &Command, user: Option<&UserIds>) -> process::Command {
        match self {
            ExecutionTarget::Local => {
                let mut worker = process::Command::new("/bin/sh");
                worker.arg("-c").arg(command.exec_string());
                if !command.working_directory.is_empty() {
                    worker.current_dir(&command.working_directory);
                }
                worker.envs(command.environment.iter().map(|(k, v)| (k, v)));
                // Switching identity needs privileges; skip it when already that user.
                if let Some(user) = user
                    && user.uid != effective_uid()
                {
                    worker.uid(user.uid).gid(user.gid);
                }
                worker
            }
            ExecutionTarget::Contained(c) => {
                let mut worker = process::Command::new(&c.attach_program);
                worker.arg("--name").arg(&c.name);
                if let Some(user) = user {
                    worker
                        .arg("--uid")
                        .arg(user.uid.to_string())
                        .arg("--gid")
                        .arg(user.gid.to_string());
                }
                for (name, value) in &command.environment {
                    worker.arg("--set-var").arg(format!("{}={}", name, value));
                }
                worker
                    .arg("--")
                    .arg("/bin/sh")
                    .arg("-c")
                    .arg(container_script(command));
                worker
            }
        }
    }
}

fn container_script(command: &Command) -> String {
    if command.working_directory.is_empty() {
        command.exec_string()
    } else {
        format!(
            "cd {} && {}",
            shell_words::quote(&command.working_directory),
            command.exec_string()
        )
    }
}

fn effective_uid() -> u32 {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() }
}

/// Look up `name` in the host user database.
fn lookup_host_user(name: &str) -> Option<UserIds> {
    let c_name = CString::new(name).ok()?;
    let mut buf_len = 1024usize;

    loop {
        let mut buf = vec![0 as libc::c_char; buf_len];
        // SAFETY: passwd is plain old data; getpwnam_r fills it in.
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = std::ptr::null_mut();

        // SAFETY: every pointer refers to live, correctly sized storage.
        let rc = unsafe {
            libc::getpwnam_r(
                c_name.as_ptr(),
                &mut pwd,
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };

        if rc == libc::ERANGE && buf_len < 1 << 20 {
            buf_len *= 2;
            continue;
        }
        if rc != 0 || result.is_null() {
            return None;
        }
        return Some(UserIds {
            name: name.to_string(),
            uid: pwd.pw_uid,
            gid: pwd.pw_gid,
        });
    }
}

/// Look up `name` in a passwd-format file (`name:x:uid:gid:...`).
fn lookup_passwd_file(path: &Path, name: &str) -> Option<UserIds> {
    let content = std::fs::read_to_string(path).ok()?;
    content
        .lines()
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let mut fields = line.split(':');
            if fields.next()? != name {
                return None;
            }
            fields.next()?;
            let uid = fields.next()?.parse().ok()?;
            let gid = fields.next()?.parse().ok()?;
            Some(UserIds {
                name: name.to_string(),
                uid,
                gid,
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn container(rootfs: &Path) -> ExecutionTarget {
        ExecutionTarget::Contained(ContainerTarget {
            id: "ct-1".to_string(),
            name: "web01".to_string(),
            rootfs: rootfs.to_path_buf(),
            attach_program: "lxc-attach".to_string(),
        })
    }

    #[test]
    fn local_working_directory_check() {
        let dir = TempDir::new().unwrap();
        let target = ExecutionTarget::Local;

        assert!(target.check_working_directory(""));
        assert!(target.check_working_directory(dir.path().to_str().unwrap()));
        assert!(!target.check_working_directory("/definitely/not/here"));

        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(!target.check_working_directory(file.to_str().unwrap()));
    }

    #[test]
    fn local_user_lookup() {
        let root = ExecutionTarget::Local.resolve_user("root").unwrap();
        assert_eq!(root.uid, 0);
        assert_eq!(root.gid, 0);

        assert!(
            ExecutionTarget::Local
                .resolve_user("no-such-user-fleet-agent")
                .is_none()
        );
        assert!(ExecutionTarget::Local.resolve_user("").is_none());
    }

    #[test]
    fn container_paths_are_under_rootfs() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("srv/app")).unwrap();
        let target = container(dir.path());

        assert_eq!(target.host_path("/srv/app"), dir.path().join("srv/app"));
        assert!(target.check_working_directory("/srv/app"));
        assert!(!target.check_working_directory("/srv/missing"));
    }

    #[test]
    fn container_user_lookup_reads_rootfs_passwd() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("etc")).unwrap();
        std::fs::write(
            dir.path().join("etc/passwd"),
            "root:x:0:0:root:/root:/bin/bash\n# comment\nwww:x:33:34::/var/www:/bin/false\n",
        )
        .unwrap();
        let target = container(dir.path());

        let www = target.resolve_user("www").unwrap();
        assert_eq!((www.uid, www.gid), (33, 34));
        assert!(target.resolve_user("nobody").is_none());
    }

    #[test]
    fn local_worker_runs_through_shell() {
        let dir = TempDir::new().unwrap();
        let command = Command::execute("c1", "host", "echo")
            .with_args(["$GREETING", "&&", "pwd"])
            .with_working_directory(dir.path().to_str().unwrap())
            .with_env("GREETING", "hi");

        let output = ExecutionTarget::Local
            .worker_command(&command, None)
            .output()
            .unwrap();
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut lines = stdout.lines();

        assert_eq!(lines.next(), Some("hi"));
        let pwd = std::fs::canonicalize(lines.next().unwrap()).unwrap();
        assert_eq!(pwd, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn container_worker_uses_attach_program() {
        let dir = TempDir::new().unwrap();
        let command = Command::execute("c1", "ct-1", "ls")
            .with_args(["-la"])
            .with_working_directory("/srv/my app")
            .with_env("MODE", "fast");
        let user = UserIds {
            name: "www".to_string(),
            uid: 33,
            gid: 34,
        };

        let worker = container(dir.path()).worker_command(&command, Some(&user));
        let args: Vec<String> = worker
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();

        assert_eq!(worker.get_program(), "lxc-attach");
        assert_eq!(
            args,
            vec![
                "--name",
                "web01",
                "--uid",
                "33",
                "--gid",
                "34",
                "--set-var",
                "MODE=fast",
                "--",
                "/bin/sh",
                "-c",
                "cd '/srv/my app' && ls -la",
            ]
        );
    }
}
