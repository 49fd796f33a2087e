use crate::command::{Command, OutputMode};
use crate::error::Result;
use crate::exec::{SessionHandle, SessionOutcome, SupervisorSettings};
use crate::response::{Response, ResponseKind};
use crate::sink::OutboundSink;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Sink that keeps every pushed response, with its arrival time, for inspection.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingSink {
    responses: Arc<Mutex<Vec<(Instant, Response)>>>,
}

impl OutboundSink for RecordingSink {
    fn push(&self, response: Response) -> Result<()> {
        self.responses
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .push((Instant::now(), response));
        Ok(())
    }
}

impl RecordingSink {
    pub(crate) fn responses(&self) -> Vec<Response> {
        self.responses
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .iter()
            .map(|(_, response)| response.clone())
            .collect()
    }

    /// When the first response of `kind` for a command was pushed.
    pub(crate) fn arrival(&self, command_id: &str, kind: ResponseKind) -> Option<Instant> {
        self.responses
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .iter()
            .find(|(_, r)| r.command_id == command_id && r.kind == kind)
            .map(|(at, _)| *at)
    }

    pub(crate) fn for_command(&self, command_id: &str) -> Vec<Response> {
        self.responses()
            .into_iter()
            .filter(|r| r.command_id == command_id)
            .collect()
    }

    pub(crate) fn terminals(&self, command_id: &str) -> Vec<Response> {
        self.for_command(command_id)
            .into_iter()
            .filter(|r| r.kind.is_terminal())
            .collect()
    }

    /// Chunk messages of a session, in response-sequence order.
    pub(crate) fn chunks(&self, command_id: &str) -> Vec<Response> {
        let mut chunks: Vec<Response> = self
            .for_command(command_id)
            .into_iter()
            .filter(|r| r.kind == ResponseKind::ExecuteResponse)
            .collect();
        chunks.sort_by_key(|r| r.response_seq);
        chunks
    }

    pub(crate) fn stdout(&self, command_id: &str) -> String {
        self.chunks(command_id)
            .iter()
            .map(|r| r.stdout.as_str())
            .collect()
    }

    pub(crate) fn stderr(&self, command_id: &str) -> String {
        self.chunks(command_id)
            .iter()
            .map(|r| r.stderr.as_str())
            .collect()
    }
}

/// A local shell command returning both streams.
pub(crate) fn shell_command(id: &str, script: &str) -> Command {
    Command::execute(id, "test-host", script).with_modes(OutputMode::Return, OutputMode::Return)
}

/// Engine settings with captures kept inside `dir`.
pub(crate) fn test_settings(dir: &Path) -> SupervisorSettings {
    SupervisorSettings {
        capture_dir: dir.to_path_buf(),
        ..SupervisorSettings::default()
    }
}

/// Join a session, failing the test if it runs past `limit`.
pub(crate) fn join_within(handle: SessionHandle, limit: Duration) -> SessionOutcome {
    let start = Instant::now();
    while !handle.is_finished() {
        assert!(
            start.elapsed() < limit,
            "session '{}' still running after {:?}",
            handle.command_id(),
            limit
        );
        std::thread::sleep(Duration::from_millis(10));
    }
    handle.join()
}

/// Whether `pid` has exited; zombies count as gone.
pub(crate) fn process_gone(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Err(_) => true,
        Ok(stat) => stat
            .rfind(')')
            .and_then(|i| stat[i + 1..].split_whitespace().next())
            .is_some_and(|state| state == "Z" || state == "X"),
    }
}
