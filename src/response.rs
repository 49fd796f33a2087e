//! Outbound response messages.
//!
//! Every message produced by a session or a control handler is a `Response`.
//! Chunk, heartbeat, and terminal messages share one envelope so a consumer can
//! order a session's output by `response_seq`.

use crate::command::Command;
use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};

/// Kind of outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseKind {
    /// Partial output chunk or liveness message.
    ExecuteResponse,
    /// Terminal message carrying the exit code.
    ExecuteResponseDone,
    /// Terminal message for a session that exceeded its timeout.
    ExecuteTimeout,
    TerminateResponseDone,
    TerminateResponseFailed,
    #[serde(rename = "SET_INOTIFY_RESPONSE")]
    SetWatchResponse,
    #[serde(rename = "UNSET_INOTIFY_RESPONSE")]
    UnsetWatchResponse,
    #[serde(rename = "LIST_INOTIFY_RESPONSE")]
    WatchListResponse,
    /// A watched path changed.
    #[serde(rename = "INOTIFY_ACTION_RESPONSE")]
    WatchEvent,
    /// Periodic agent registration heartbeat.
    #[serde(rename = "HEARTBEAT_RESPONSE")]
    Registration,
}

impl ResponseKind {
    /// Terminal kinds end a session; exactly one is sent per session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResponseKind::ExecuteResponseDone | ResponseKind::ExecuteTimeout
        )
    }
}

/// One outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub kind: ResponseKind,
    pub target_id: String,
    pub command_id: String,
    pub pid: u32,
    pub request_seq: u64,
    pub response_seq: u64,
    pub stdout: String,
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
}

impl Response {
    fn envelope(kind: ResponseKind, command: &Command, pid: u32, response_seq: u64) -> Self {
        Self {
            kind,
            target_id: command.target_id.clone(),
            command_id: command.id.clone(),
            pid,
            request_seq: command.request_seq,
            response_seq,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            paths: Vec::new(),
        }
    }

    /// Partial output; also used for heartbeat liveness messages.
    pub fn chunk(
        command: &Command,
        pid: u32,
        response_seq: u64,
        stdout: String,
        stderr: String,
    ) -> Self {
        Self {
            stdout,
            stderr,
            ..Self::envelope(ResponseKind::ExecuteResponse, command, pid, response_seq)
        }
    }

    pub fn done(command: &Command, pid: u32, response_seq: u64, exit_code: i32) -> Self {
        Self {
            exit_code: Some(exit_code),
            ..Self::envelope(ResponseKind::ExecuteResponseDone, command, pid, response_seq)
        }
    }

    pub fn timeout(command: &Command, pid: u32, response_seq: u64) -> Self {
        Self::envelope(ResponseKind::ExecuteTimeout, command, pid, response_seq)
    }

    pub fn terminate_done(command: &Command, pid: u32) -> Self {
        Self {
            exit_code: Some(0),
            ..Self::envelope(ResponseKind::TerminateResponseDone, command, pid, 1)
        }
    }

    pub fn terminate_failed(command: &Command, pid: u32) -> Self {
        Self {
            exit_code: Some(1),
            ..Self::envelope(ResponseKind::TerminateResponseFailed, command, pid, 1)
        }
    }

    /// Reply to a watch-management request listing the affected paths.
    pub fn watch(kind: ResponseKind, command: &Command, paths: Vec<String>) -> Self {
        Self {
            paths,
            ..Self::envelope(kind, command, 0, 1)
        }
    }

    /// Change notification for a watched path.
    pub fn watch_event(agent_id: &str, path: String, action: &str) -> Self {
        Self {
            kind: ResponseKind::WatchEvent,
            target_id: agent_id.to_string(),
            command_id: String::new(),
            pid: 0,
            request_seq: 0,
            response_seq: 0,
            stdout: action.to_string(),
            stderr: String::new(),
            exit_code: None,
            paths: vec![path],
        }
    }

    /// Agent registration heartbeat listing the agent and its containers.
    pub fn registration(agent_id: &str, container_ids: Vec<String>) -> Self {
        Self {
            kind: ResponseKind::Registration,
            target_id: agent_id.to_string(),
            command_id: String::new(),
            pid: std::process::id(),
            request_seq: 0,
            response_seq: 0,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            paths: container_ids,
        }
    }

    /// Serialize to a single-line JSON string.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            AgentError::Serialization(format!(
                "failed to serialize response for '{}': {}",
                self.command_id, e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;

    fn command() -> Command {
        Command::execute("c1", "rh-01", "echo hi").with_request_seq(7)
    }

    #[test]
    fn chunk_carries_envelope_fields() {
        let r = Response::chunk(&command(), 4321, 2, "out".into(), String::new());
        assert_eq!(r.kind, ResponseKind::ExecuteResponse);
        assert_eq!(r.target_id, "rh-01");
        assert_eq!(r.command_id, "c1");
        assert_eq!(r.pid, 4321);
        assert_eq!(r.request_seq, 7);
        assert_eq!(r.response_seq, 2);
        assert_eq!(r.stdout, "out");
        assert_eq!(r.exit_code, None);
    }

    #[test]
    fn terminal_kinds() {
        let done = Response::done(&command(), 1, 3, 0);
        assert!(done.kind.is_terminal());
        assert_eq!(done.exit_code, Some(0));
        assert!(done.stdout.is_empty());

        let timeout = Response::timeout(&command(), 1, 3);
        assert!(timeout.kind.is_terminal());
        assert_eq!(timeout.exit_code, None);

        assert!(!ResponseKind::ExecuteResponse.is_terminal());
        assert!(!ResponseKind::TerminateResponseDone.is_terminal());
    }

    #[test]
    fn terminate_responses_carry_exit_codes() {
        assert_eq!(Response::terminate_done(&command(), 9).exit_code, Some(0));
        assert_eq!(Response::terminate_failed(&command(), 9).exit_code, Some(1));
    }

    #[test]
    fn json_uses_wire_kind_names() {
        let json = Response::done(&command(), 10, 2, 1).to_json().unwrap();
        assert!(json.contains(r#""kind":"EXECUTE_RESPONSE_DONE""#));
        assert!(json.contains(r#""exit_code":1"#));
        assert!(!json.contains("paths"));

        let json = Response::watch(
            ResponseKind::WatchListResponse,
            &command(),
            vec!["/etc".to_string()],
        )
        .to_json()
        .unwrap();
        assert!(json.contains(r#""kind":"LIST_INOTIFY_RESPONSE""#));
        assert!(json.contains(r#""paths":["/etc"]"#));
    }
}
