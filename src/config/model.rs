//! AgentConfig struct definition and default implementation.

use super::types::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the fleet agent.
///
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    // =========================================================================
    // Identity
    // =========================================================================
    /// Identifier of this host; commands addressed to it run locally.
    #[serde(default = "default_agent_id")]
    pub agent_id: String,

    // =========================================================================
    // Admission
    // =========================================================================
    /// Maximum concurrently live execution-channel sessions (default: CPU cores).
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Number of recently seen command ids remembered for duplicate suppression.
    #[serde(default = "default_duplicate_window")]
    pub duplicate_window: usize,

    /// Upper bound for one transport poll inside a dispatch iteration.
    #[serde(default = "default_transport_poll_ms")]
    pub transport_poll_ms: u64,

    // =========================================================================
    // Execution engine
    // =========================================================================
    /// Readiness wait per stream per poll cycle.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Seconds without output after which a liveness message is sent.
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,

    /// Pending bytes per stream that trigger a chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Attempts made to discover the worker beneath the spawned shell.
    #[serde(default = "default_pid_resolve_attempts")]
    pub pid_resolve_attempts: u32,

    /// Delay between pid resolution attempts.
    #[serde(default = "default_pid_resolve_interval_ms")]
    pub pid_resolve_interval_ms: u64,

    /// Directory for capture files when a command names none.
    #[serde(default = "default_capture_dir")]
    pub capture_dir: PathBuf,

    // =========================================================================
    // Outbound sink
    // =========================================================================
    /// Bounded capacity of the outbound response queue.
    #[serde(default = "default_sink_capacity")]
    pub sink_capacity: usize,

    /// Optional deadline for one push; unset blocks until accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink_send_timeout_ms: Option<u64>,

    // =========================================================================
    // Containers
    // =========================================================================
    /// Root of the LXC container tree.
    #[serde(default = "default_lxc_path")]
    pub lxc_path: PathBuf,

    /// Program used to run commands inside a container.
    #[serde(default = "default_attach_program")]
    pub attach_program: String,

    /// Seconds after which a manager lock is ignored as stale.
    #[serde(default = "default_manager_lock_stale_secs")]
    pub manager_lock_stale_secs: u64,

    /// Interval of the agent registration heartbeat.
    #[serde(default = "default_registration_interval_secs")]
    pub registration_interval_secs: u64,

    // =========================================================================
    // Observability
    // =========================================================================
    /// NDJSON audit log; disabled when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_log: Option<PathBuf>,

    /// Default tracing filter, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: default_agent_id(),
            max_sessions: default_max_sessions(),
            duplicate_window: default_duplicate_window(),
            transport_poll_ms: default_transport_poll_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            chunk_size: default_chunk_size(),
            pid_resolve_attempts: default_pid_resolve_attempts(),
            pid_resolve_interval_ms: default_pid_resolve_interval_ms(),
            capture_dir: default_capture_dir(),
            sink_capacity: default_sink_capacity(),
            sink_send_timeout_ms: None,
            lxc_path: default_lxc_path(),
            attach_program: default_attach_program(),
            manager_lock_stale_secs: default_manager_lock_stale_secs(),
            registration_interval_secs: default_registration_interval_secs(),
            event_log: None,
            log_level: default_log_level(),
        }
    }
}
