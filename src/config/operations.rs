//! Config loading, validation, and derived settings.

use super::model::AgentConfig;
use crate::error::{AgentError, Result};
use crate::exec::SupervisorSettings;
use std::path::{Path, PathBuf};
use std::time::Duration;

impl AgentConfig {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Load config from `path` if given, otherwise use the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // serde_yaml rejects an empty document; treat it as "all defaults".
        let config: AgentConfig = if yaml.trim().is_empty() {
            AgentConfig::default()
        } else {
            serde_yaml::from_str(yaml)
                .map_err(|e| AgentError::Config(format!("failed to parse config YAML: {}", e)))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| AgentError::Config(format!("failed to serialize config to YAML: {}", e)))
    }

    /// Validate config values and return error on invalid values.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_sessions", self.max_sessions as u64),
            ("duplicate_window", self.duplicate_window as u64),
            ("poll_interval_ms", self.poll_interval_ms),
            ("heartbeat_timeout_secs", self.heartbeat_timeout_secs),
            ("chunk_size", self.chunk_size as u64),
            ("sink_capacity", self.sink_capacity as u64),
            ("registration_interval_secs", self.registration_interval_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(AgentError::Config(format!(
                    "config validation failed: {} must be greater than 0",
                    name
                )));
            }
        }

        // A chunk must hold at least one complete UTF-8 character.
        if self.chunk_size < 4 {
            return Err(AgentError::Config(
                "config validation failed: chunk_size must be at least 4".to_string(),
            ));
        }

        if self.attach_program.trim().is_empty() {
            return Err(AgentError::Config(
                "config validation failed: attach_program must be non-empty".to_string(),
            ));
        }

        if self.agent_id.trim().is_empty() {
            return Err(AgentError::Config(
                "config validation failed: agent_id must be non-empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Settings handed to every Process Supervisor.
    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
            chunk_size: self.chunk_size,
            pid_resolve_attempts: self.pid_resolve_attempts,
            pid_resolve_interval: Duration::from_millis(self.pid_resolve_interval_ms),
            capture_dir: self.capture_dir.clone(),
        }
    }

    /// Path of the container-manager lock file.
    pub fn manager_lock_path(&self) -> PathBuf {
        self.lxc_path.join(".manager.lock")
    }

    pub fn sink_send_timeout(&self) -> Option<Duration> {
        self.sink_send_timeout_ms.map(Duration::from_millis)
    }
}
