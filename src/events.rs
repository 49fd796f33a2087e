//! Audit event log for the fleet agent.
//!
//! Admission and lifecycle decisions are appended to an NDJSON file (one JSON
//! object per line) when `event_log` is configured.
//!
//! # Event Format
//!
//! - `ts`: RFC3339 timestamp
//! - `action`: what happened (admit, duplicate, reap, ...)
//! - `actor`: the agent identity (e.g., `root@HOST`)
//! - `command`: optional command id
//! - `details`: freeform object with action-specific details

use crate::error::{AgentError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Actions that can be logged as events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    /// Dispatch loop started
    AgentStart,
    /// Dispatch loop stopped
    AgentStop,
    /// Command handed to a supervisor
    Admit,
    /// Command id already in the ledger
    Duplicate,
    /// Command rejected before dispatch
    Reject,
    /// Worker could not be spawned
    SpawnFailed,
    /// Finished session removed from the live set
    Reap,
    /// Terminate request handled
    Terminate,
    WatchSet,
    WatchUnset,
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventAction::AgentStart => write!(f, "agent_start"),
            EventAction::AgentStop => write!(f, "agent_stop"),
            EventAction::Admit => write!(f, "admit"),
            EventAction::Duplicate => write!(f, "duplicate"),
            EventAction::Reject => write!(f, "reject"),
            EventAction::SpawnFailed => write!(f, "spawn_failed"),
            EventAction::Reap => write!(f, "reap"),
            EventAction::Terminate => write!(f, "terminate"),
            EventAction::WatchSet => write!(f, "watch_set"),
            EventAction::WatchUnset => write!(f, "watch_unset"),
        }
    }
}

/// An event record for the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub ts: DateTime<Utc>,
    pub action: EventAction,
    pub actor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub details: Value,
}

impl Event {
    /// Create a new event stamped with the current time and agent identity.
    pub fn new(action: EventAction) -> Self {
        Self {
            ts: Utc::now(),
            action,
            actor: get_actor_string(),
            command: None,
            details: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_command(mut self, command_id: impl Into<String>) -> Self {
        self.command = Some(command_id.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Serialize the event to a single-line JSON string.
    pub fn to_ndjson_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            AgentError::Serialization(format!("failed to serialize event to JSON: {}", e))
        })
    }
}

/// `user@host` identity of the running agent.
pub(crate) fn get_actor_string() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    format!("{}@{}", user, host)
}

/// Append an event as one line to `path`, creating the file and its directory.
pub fn append_event(path: &Path, event: &Event) -> Result<()> {
    let json_line = event.to_ndjson_line()?;

    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
        && !dir.exists()
    {
        fs::create_dir_all(dir).map_err(|e| {
            AgentError::Io(format!(
                "failed to create events directory '{}': {}",
                dir.display(),
                e
            ))
        })?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            AgentError::Io(format!(
                "failed to open events file '{}': {}",
                path.display(),
                e
            ))
        })?;

    writeln!(file, "{}", json_line).map_err(|e| {
        AgentError::Io(format!(
            "failed to write event to '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Read all events from `path`, skipping lines that fail to parse.
pub fn read_events(path: &Path) -> Result<Vec<Event>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path).map_err(|e| {
        AgentError::Io(format!(
            "failed to read events file '{}': {}",
            path.display(),
            e
        ))
    })?;

    Ok(content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}

/// Optional audit log; recording never fails the caller.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    path: Option<PathBuf>,
}

impl EventLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn record(&self, event: Event) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = append_event(path, &event) {
            tracing::warn!(action = %event.action, error = %e, "failed to record event");
        }
    }
}
