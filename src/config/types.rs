//! Default values for the agent configuration.

use std::path::PathBuf;

// Default value functions for serde
pub(crate) fn default_agent_id() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "localhost".to_string())
}

/// Number of CPU cores visible to the agent; the admission cap.
pub(crate) fn default_max_sessions() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
pub(crate) fn default_poll_interval_ms() -> u64 {
    50
}
pub(crate) fn default_heartbeat_timeout_secs() -> u64 {
    10
}
pub(crate) fn default_chunk_size() -> usize {
    1000
}
pub(crate) fn default_pid_resolve_attempts() -> u32 {
    20
}
pub(crate) fn default_pid_resolve_interval_ms() -> u64 {
    5
}
pub(crate) fn default_transport_poll_ms() -> u64 {
    100
}
pub(crate) fn default_sink_capacity() -> usize {
    100
}
pub(crate) fn default_duplicate_window() -> usize {
    300
}
pub(crate) fn default_capture_dir() -> PathBuf {
    PathBuf::from("/var/lib/fleet-agent/capture")
}
pub(crate) fn default_lxc_path() -> PathBuf {
    PathBuf::from("/var/lib/lxc")
}
pub(crate) fn default_attach_program() -> String {
    "lxc-attach".to_string()
}
pub(crate) fn default_manager_lock_stale_secs() -> u64 {
    600
}
pub(crate) fn default_registration_interval_secs() -> u64 {
    30
}
pub(crate) fn default_log_level() -> String {
    "info".to_string()
}
