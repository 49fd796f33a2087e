//! Command struct, builders, and validation.

use super::types::{CommandKind, OutputMode};
use crate::error::{AgentError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;

static ENV_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid environment name regex")
});

/// Description of one unit of work.
///
/// `id` is assigned by the submitter and is the deduplication key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Command {
    pub id: String,

    /// Host or container identifier the command is addressed to.
    pub target_id: String,

    pub kind: CommandKind,

    pub program: String,

    /// Raw arguments; shell syntax is preserved when joined into the exec string.
    pub args: Vec<String>,

    pub working_directory: String,

    /// User name the worker runs as; empty keeps the agent's user.
    pub run_as: String,

    pub environment: Vec<(String, String)>,

    pub stdout_mode: OutputMode,
    pub stderr_mode: OutputMode,

    /// Backing file for captured stdout; derived from the capture dir when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_path: Option<PathBuf>,

    /// Execution timeout in seconds; 0 disables it.
    pub timeout_secs: u64,

    /// Sequence number of the originating request, echoed in every response.
    pub request_seq: u64,

    /// Pid to signal for `TERMINATE_REQUEST`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,

    /// Paths for watch-management requests.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub watch_paths: Vec<String>,
}

impl Command {
    /// Create an execute command for `program` on `target_id`.
    pub fn execute(
        id: impl Into<String>,
        target_id: impl Into<String>,
        program: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            target_id: target_id.into(),
            kind: CommandKind::Execute,
            program: program.into(),
            ..Self::default()
        }
    }

    /// Create a control command of the given kind.
    pub fn control(id: impl Into<String>, target_id: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            id: id.into(),
            target_id: target_id.into(),
            kind,
            ..Self::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = dir.into();
        self
    }

    pub fn with_run_as(mut self, user: impl Into<String>) -> Self {
        self.run_as = user.into();
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.push((name.into(), value.into()));
        self
    }

    pub fn with_modes(mut self, stdout: OutputMode, stderr: OutputMode) -> Self {
        self.stdout_mode = stdout;
        self.stderr_mode = stderr;
        self
    }

    pub fn with_capture_paths(mut self, stdout: Option<PathBuf>, stderr: Option<PathBuf>) -> Self {
        self.stdout_path = stdout;
        self.stderr_path = stderr;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_request_seq(mut self, seq: u64) -> Self {
        self.request_seq = seq;
        self
    }

    pub fn with_pid(mut self, pid: i32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn with_watch_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.watch_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Decode a command from one JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| AgentError::Serialization(format!("failed to parse command: {}", e)))
    }

    /// The shell string handed to `/bin/sh -c`.
    ///
    /// Arguments are joined verbatim so pipes, `&&` and redirections in them
    /// keep their shell meaning.
    pub fn exec_string(&self) -> String {
        let mut exec = self.program.trim().to_string();
        for arg in &self.args {
            exec.push(' ');
            exec.push_str(arg);
        }
        exec
    }

    /// True when the exec string ends with a single `&` background marker.
    pub fn is_background(&self) -> bool {
        let exec = self.exec_string();
        let trimmed = exec.trim_end();
        trimmed.ends_with('&') && !trimmed.ends_with("&&")
    }

    /// Check that the command is well formed for its kind.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AgentError::UserError("command id is empty".to_string()));
        }

        match self.kind {
            CommandKind::Execute if self.program.trim().is_empty() => {
                return Err(AgentError::UserError(format!(
                    "command '{}' has no program to execute",
                    self.id
                )));
            }
            CommandKind::Terminate if self.pid.is_none_or(|pid| pid <= 0) => {
                return Err(AgentError::UserError(format!(
                    "terminate command '{}' needs a positive pid",
                    self.id
                )));
            }
            CommandKind::SetWatch | CommandKind::UnsetWatch if self.watch_paths.is_empty() => {
                return Err(AgentError::UserError(format!(
                    "watch command '{}' names no paths",
                    self.id
                )));
            }
            _ => {}
        }

        for (name, _) in &self.environment {
            if !ENV_NAME_REGEX.is_match(name) {
                return Err(AgentError::UserError(format!(
                    "command '{}' has invalid environment variable name '{}'",
                    self.id, name
                )));
            }
        }

        Ok(())
    }
}
