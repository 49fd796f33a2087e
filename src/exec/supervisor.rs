//! Process Supervisor: one thread per admitted command.

use super::chunk::{PendingOutput, StreamKind};
use super::pid::resolve_worker_pid;
use super::stream::{StreamEvent, StreamReader, select_pair};
use super::target::ExecutionTarget;
use super::timer::SecondsCounter;
use crate::command::Command;
use crate::error::{AgentError, Result};
use crate::response::Response;
use crate::sink::OutboundSink;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Child, ExitStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const WORKING_DIRECTORY_MISSING: &str = "Working Directory Does Not Exist on System";
pub const USER_MISSING: &str = "User Does Not Exist on System";

/// Engine tunables, derived from the agent configuration.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Readiness wait per cycle, shared by both streams.
    pub poll_interval: Duration,
    /// Silence after which a liveness message is sent.
    pub heartbeat_timeout: Duration,
    /// Pending bytes per stream that trigger a chunk.
    pub chunk_size: usize,
    pub pid_resolve_attempts: u32,
    pub pid_resolve_interval: Duration,
    /// Where capture files go when a command names none.
    pub capture_dir: PathBuf,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            heartbeat_timeout: Duration::from_secs(10),
            chunk_size: 1000,
            pid_resolve_attempts: 20,
            pid_resolve_interval: Duration::from_millis(5),
            capture_dir: std::env::temp_dir().join("fleet-agent-capture"),
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// DONE was sent with this exit code.
    Done(i32),
    /// TIMEOUT was sent and the worker killed.
    TimedOut,
    /// A detached command was started; DONE was sent with this exit code.
    Background(i32),
    /// The session aborted without a terminal message.
    Failed(String),
}

/// Handle the dispatch loop keeps for a live session.
#[derive(Debug)]
pub struct SessionHandle {
    command_id: String,
    pid: Arc<AtomicU32>,
    thread: JoinHandle<SessionOutcome>,
}

impl SessionHandle {
    pub fn command_id(&self) -> &str {
        &self.command_id
    }

    /// Pid reported in responses; the spawned shell until resolution converges.
    pub fn pid(&self) -> u32 {
        self.pid.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the supervisor thread to end.
    pub fn join(self) -> SessionOutcome {
        self.thread
            .join()
            .unwrap_or_else(|_| SessionOutcome::Failed("supervisor thread panicked".to_string()))
    }
}

/// Failed precondition checks for a command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Preconditions {
    working_directory_missing: bool,
    user_missing: bool,
}

impl Preconditions {
    fn failed(&self) -> bool {
        self.working_directory_missing || self.user_missing
    }

    fn messages(&self) -> impl Iterator<Item = &'static str> {
        [
            (self.working_directory_missing, WORKING_DIRECTORY_MISSING),
            (self.user_missing, USER_MISSING),
        ]
        .into_iter()
        .filter_map(|(failed, message)| failed.then_some(message))
    }
}

/// Start a session for `command` on `target`.
///
/// Runs on the caller's thread up to the worker spawn; everything after is
/// owned by the supervisor thread. Returns `AgentError::Spawn` when the
/// worker cannot be created, in which case no session exists.
pub fn launch(
    command: Command,
    target: ExecutionTarget,
    sink: Arc<dyn OutboundSink>,
    settings: SupervisorSettings,
) -> Result<SessionHandle> {
    let user = target.resolve_user(&command.run_as);
    let checks = Preconditions {
        working_directory_missing: !target.check_working_directory(&command.working_directory),
        user_missing: !command.run_as.is_empty() && user.is_none(),
    };

    let shared_pid = Arc::new(AtomicU32::new(0));
    let command_id = command.id.clone();

    if checks.failed() {
        tracing::warn!(
            command_id = %command.id,
            target = target.label(),
            cwd = %command.working_directory,
            user = %command.run_as,
            "precondition failed; worker not started"
        );
        let thread = spawn_thread(&command_id, move || {
            report_precondition_failure(&command, checks, sink.as_ref())
        })?;
        return Ok(SessionHandle {
            command_id,
            pid: shared_pid,
            thread,
        });
    }

    if command.is_background() {
        let child = target
            .daemon_command(&command, user.as_ref())
            .spawn()
            .map_err(|e| spawn_error(&command, &target, e))?;
        shared_pid.store(child.id(), Ordering::Release);
        tracing::info!(command_id = %command.id, pid = child.id(), "background command started");

        let thread = spawn_thread(&command_id, move || {
            run_background(&command, child, sink.as_ref())
        })?;
        return Ok(SessionHandle {
            command_id,
            pid: shared_pid,
            thread,
        });
    }

    let stdout_capture = capture_path(&command, StreamKind::Stdout, &settings);
    let stderr_capture = capture_path(&command, StreamKind::Stderr, &settings);

    let mut child = target
        .worker_command(&command, user.as_ref())
        .spawn()
        .map_err(|e| spawn_error(&command, &target, e))?;
    let started = Instant::now();
    shared_pid.store(child.id(), Ordering::Release);

    let readers = open_readers(&mut child, stdout_capture, stderr_capture, &settings);
    let (stdout, stderr) = match readers {
        Ok(readers) => readers,
        Err(e) => {
            kill_group(child.id());
            let _ = child.wait();
            return Err(e);
        }
    };

    tracing::info!(
        command_id = %command.id,
        target = target.label(),
        pid = child.id(),
        "worker spawned"
    );

    let session = Session::new(
        command,
        child,
        (stdout, stderr),
        Arc::clone(&shared_pid),
        sink,
        settings,
        started,
    );

    let thread = spawn_thread(&command_id, move || session.run())?;
    Ok(SessionHandle {
        command_id,
        pid: shared_pid,
        thread,
    })
}

fn spawn_thread<F>(command_id: &str, body: F) -> Result<JoinHandle<SessionOutcome>>
where
    F: FnOnce() -> SessionOutcome + Send + 'static,
{
    thread::Builder::new()
        .name(format!("session-{}", command_id))
        .spawn(body)
        .map_err(|e| {
            AgentError::Spawn(format!(
                "failed to start supervisor for '{}': {}",
                command_id, e
            ))
        })
}

fn spawn_error(command: &Command, target: &ExecutionTarget, e: std::io::Error) -> AgentError {
    AgentError::Spawn(format!(
        "failed to spawn '{}' for command '{}' on {}: {}",
        command.exec_string(),
        command.id,
        target.label(),
        e
    ))
}

fn capture_path(
    command: &Command,
    stream: StreamKind,
    settings: &SupervisorSettings,
) -> Option<PathBuf> {
    let (mode, explicit, suffix) = match stream {
        StreamKind::Stdout => (command.stdout_mode, &command.stdout_path, "out"),
        StreamKind::Stderr => (command.stderr_mode, &command.stderr_path, "err"),
    };
    if !mode.requires_capture() {
        return None;
    }
    Some(explicit.clone().unwrap_or_else(|| {
        settings
            .capture_dir
            .join(format!("{}.{}", sanitize(&command.id), suffix))
    }))
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn open_readers(
    child: &mut Child,
    stdout_capture: Option<PathBuf>,
    stderr_capture: Option<PathBuf>,
    settings: &SupervisorSettings,
) -> Result<(StreamReader, StreamReader)> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AgentError::Spawn("worker stdout was not piped".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AgentError::Spawn("worker stderr was not piped".to_string()))?;

    let mut stdout = StreamReader::new(stdout);
    let mut stderr = StreamReader::new(stderr);
    if let Some(path) = stdout_capture {
        stdout = stdout.with_capture(&path)?;
    }
    if let Some(path) = stderr_capture {
        stderr = stderr.with_capture(&path)?;
    }
    stdout.set_timeout(settings.poll_interval);
    stderr.set_timeout(settings.poll_interval);
    Ok((stdout, stderr))
}

/// Error chunk per failed check, then DONE with exit code 1.
fn report_precondition_failure(
    command: &Command,
    checks: Preconditions,
    sink: &dyn OutboundSink,
) -> SessionOutcome {
    let mut seq = 1;
    for message in checks.messages() {
        let chunk = Response::chunk(command, 0, seq, String::new(), message.to_string());
        if let Err(e) = sink.push(chunk) {
            return SessionOutcome::Failed(e.to_string());
        }
        seq += 1;
    }

    match sink.push(Response::done(command, 0, seq, 1)) {
        Ok(()) => SessionOutcome::Done(1),
        Err(e) => SessionOutcome::Failed(e.to_string()),
    }
}

/// Wait for the backgrounding shell, then report completion.
fn run_background(command: &Command, mut child: Child, sink: &dyn OutboundSink) -> SessionOutcome {
    let pid = child.id();
    if let Err(e) = child.wait() {
        tracing::warn!(command_id = %command.id, pid, error = %e, "failed to reap background shell");
    }

    match sink.push(Response::done(command, pid, 1, 0)) {
        Ok(()) => SessionOutcome::Background(0),
        Err(e) => SessionOutcome::Failed(e.to_string()),
    }
}

/// Exit code of a finished worker; signals map to 128 + signal number.
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(1)
}

/// SIGKILL a process group. Errors (already gone) are ignored.
fn kill_group(pgid: u32) {
    if pgid == 0 {
        return;
    }
    // SAFETY: kill has no memory-safety preconditions.
    unsafe {
        libc::kill(-(pgid as libc::pid_t), libc::SIGKILL);
    }
}

/// SIGKILL one process; returns whether the signal was delivered.
pub fn kill_pid(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    // SAFETY: kill has no memory-safety preconditions.
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) == 0 }
}

/// Live state of one running command.
struct Session {
    command: Command,
    child: Child,
    /// Resolved worker pid, reported in every response.
    pid: u32,
    shared_pid: Arc<AtomicU32>,
    stdout: StreamReader,
    stderr: StreamReader,
    pending: PendingOutput,
    /// Sequence number of the next response.
    response_seq: u64,
    exec_timer: SecondsCounter,
    heartbeat: SecondsCounter,
    sink: Arc<dyn OutboundSink>,
    settings: SupervisorSettings,
}

impl Session {
    fn new(
        command: Command,
        child: Child,
        (stdout, stderr): (StreamReader, StreamReader),
        shared_pid: Arc<AtomicU32>,
        sink: Arc<dyn OutboundSink>,
        settings: SupervisorSettings,
        started: Instant,
    ) -> Self {
        Self {
            exec_timer: SecondsCounter::from_secs(command.timeout_secs, started),
            heartbeat: SecondsCounter::starting_at(Some(settings.heartbeat_timeout), started),
            pid: child.id(),
            shared_pid,
            command,
            child,
            stdout,
            stderr,
            pending: PendingOutput::default(),
            response_seq: 1,
            sink,
            settings,
        }
    }

    fn run(mut self) -> SessionOutcome {
        self.resolve_pid();

        match self.poll_loop() {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    command_id = %self.command.id,
                    pid = self.pid,
                    error = %e,
                    "session aborted"
                );
                kill_group(self.child.id());
                let _ = self.child.wait();
                SessionOutcome::Failed(e.to_string())
            }
        }
    }

    fn resolve_pid(&mut self) {
        let resolution = resolve_worker_pid(
            &mut self.child,
            self.settings.pid_resolve_attempts,
            self.settings.pid_resolve_interval,
        );
        self.pid = resolution.or_child(self.child.id());
        self.shared_pid.store(self.pid, Ordering::Release);
        tracing::debug!(command_id = %self.command.id, pid = self.pid, ?resolution, "worker pid resolved");
    }

    fn poll_loop(&mut self) -> Result<SessionOutcome> {
        loop {
            let mut activity = false;

            // One wait covers both pipes so a cycle never exceeds poll_interval.
            let (stdout_ready, stderr_ready) =
                select_pair(&self.stdout, &self.stderr, self.settings.poll_interval)?;
            if stdout_ready && let StreamEvent::Data(_) = self.stdout.read_ready()? {
                self.pending.append(StreamKind::Stdout, self.stdout.buffer());
                activity = true;
            }
            if stderr_ready && let StreamEvent::Data(_) = self.stderr.read_ready()? {
                self.pending.append(StreamKind::Stderr, self.stderr.buffer());
                activity = true;
            }

            let now = Instant::now();
            if self.exec_timer.expired(now) {
                return self.finish_timeout();
            }

            if activity {
                self.heartbeat.reset(now);
            } else if self.heartbeat.expired(now) {
                self.send_heartbeat()?;
                self.heartbeat.reset(now);
            }

            self.flush_threshold()?;

            if self.stdout.is_closed() && self.stderr.is_closed() {
                match self.child.try_wait() {
                    Ok(Some(status)) => return self.finish_done(status),
                    Ok(None) => thread::sleep(self.settings.poll_interval),
                    Err(e) => {
                        return Err(AgentError::Stream(format!(
                            "failed to check worker status: {}",
                            e
                        )));
                    }
                }
            }
        }
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.response_seq;
        self.response_seq += 1;
        seq
    }

    fn send_chunk(&mut self, stdout: String, stderr: String) -> Result<()> {
        let seq = self.next_seq();
        let response = Response::chunk(&self.command, self.pid, seq, stdout, stderr);
        self.sink.push(response)
    }

    fn send_heartbeat(&mut self) -> Result<()> {
        let chunk = self
            .pending
            .take_heartbeat(self.command.stdout_mode, self.command.stderr_mode);
        tracing::debug!(command_id = %self.command.id, pid = self.pid, "sending liveness message");
        self.send_chunk(chunk.stdout, chunk.stderr)
    }

    /// Flush while either side is at or over the chunk size.
    fn flush_threshold(&mut self) -> Result<()> {
        let limit = self.settings.chunk_size;
        while self.pending.over_threshold(limit) {
            let Some(chunk) =
                self.pending
                    .next_chunk(limit, self.command.stdout_mode, self.command.stderr_mode)
            else {
                break;
            };
            self.send_chunk(chunk.stdout, chunk.stderr)?;
        }
        Ok(())
    }

    /// Send whatever permitted output is left.
    fn flush_remaining(&mut self) -> Result<()> {
        let limit = self.settings.chunk_size;
        while let Some(chunk) =
            self.pending
                .last_chunk(limit, self.command.stdout_mode, self.command.stderr_mode)
        {
            self.send_chunk(chunk.stdout, chunk.stderr)?;
        }
        Ok(())
    }

    fn finish_timeout(&mut self) -> Result<SessionOutcome> {
        self.flush_remaining()?;
        let seq = self.next_seq();
        self.sink
            .push(Response::timeout(&self.command, self.pid, seq))?;

        tracing::info!(
            command_id = %self.command.id,
            pid = self.pid,
            timeout_secs = self.command.timeout_secs,
            "execution timed out; killing worker"
        );
        kill_pid(self.pid);
        kill_group(self.child.id());
        let _ = self.child.wait();
        Ok(SessionOutcome::TimedOut)
    }

    fn finish_done(&mut self, status: ExitStatus) -> Result<SessionOutcome> {
        let code = exit_code(status);
        self.flush_remaining()?;
        let seq = self.next_seq();
        self.sink
            .push(Response::done(&self.command, self.pid, seq, code))?;

        tracing::info!(command_id = %self.command.id, pid = self.pid, exit_code = code, "worker finished");
        Ok(SessionOutcome::Done(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingSink, process_gone, shell_command, test_settings};
    use std::fs::File;
    use std::os::fd::AsRawFd;

    #[test]
    fn read_failure_aborts_without_terminal_and_kills_worker() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = test_settings(dir.path());
        let command = shell_command("c-io", "sleep 30; echo late");
        let mut child = ExecutionTarget::Local
            .worker_command(&command, None)
            .spawn()
            .unwrap();
        let started = Instant::now();

        // Replace the stdout pipe with a directory: poll says readable, read fails.
        let root = File::open("/").unwrap();
        let stdout_fd = child.stdout.as_ref().unwrap().as_raw_fd();
        // SAFETY: both descriptors are open; stdout_fd stays owned by the child handle.
        assert!(unsafe { libc::dup2(root.as_raw_fd(), stdout_fd) } >= 0);

        let readers = open_readers(&mut child, None, None, &settings).unwrap();
        let pgid = child.id();
        let sink = RecordingSink::default();
        let session = Session::new(
            command,
            child,
            readers,
            Arc::new(AtomicU32::new(pgid)),
            Arc::new(sink.clone()),
            settings,
            started,
        );

        let outcome = session.run();

        assert!(
            matches!(&outcome, SessionOutcome::Failed(reason) if reason.contains("read failed")),
            "{:?}",
            outcome
        );
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(sink.terminals("c-io").is_empty());
        assert!(sink.responses().is_empty());

        // The whole group went down, not just the shell.
        assert!(process_gone(pgid));
        let deadline = Instant::now() + Duration::from_secs(2);
        while group_has_live_members(pgid) {
            assert!(Instant::now() < deadline, "process group {} survived", pgid);
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    fn group_has_live_members(pgid: u32) -> bool {
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return false;
        };
        entries.flatten().any(|entry| {
            let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
                return false;
            };
            let Some(fields) = stat.rfind(')').map(|i| &stat[i + 1..]) else {
                return false;
            };
            let fields: Vec<&str> = fields.split_whitespace().collect();
            fields.len() > 2
                && fields[2] == pgid.to_string()
                && fields[0] != "Z"
                && fields[0] != "X"
        })
    }
}
