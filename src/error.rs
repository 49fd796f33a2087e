//! Error types for the fleet agent.
//!
//! Uses thiserror for derive macros and provides user-actionable error messages.

use crate::exit_codes;
use thiserror::Error;

/// Main error type for agent operations.
///
/// Each variant maps to a process exit code; inside the dispatch loop most of
/// them are logged and the loop keeps running.
#[derive(Error, Debug)]
pub enum AgentError {
    /// User provided invalid arguments or a malformed command.
    #[error("{0}")]
    UserError(String),

    /// Configuration could not be read, parsed, or validated.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem or OS-level failure outside the stream poll loop.
    #[error("I/O error: {0}")]
    Io(String),

    /// Worker process tree could not be created.
    #[error("Spawn failed: {0}")]
    Spawn(String),

    /// Readiness selection or read on a worker pipe failed.
    #[error("Stream error: {0}")]
    Stream(String),

    /// Inbound transport failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Outbound sink refused or timed out a push.
    #[error("Sink error: {0}")]
    Sink(String),

    /// Command or response (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Manager lock could not be acquired or read.
    #[error("Lock failed: {0}")]
    Lock(String),
}

impl AgentError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            AgentError::UserError(_) => exit_codes::USER_ERROR,
            AgentError::Config(_) => exit_codes::USER_ERROR,
            AgentError::Serialization(_) => exit_codes::USER_ERROR,
            AgentError::Io(_) => exit_codes::USER_ERROR,
            AgentError::Spawn(_) => exit_codes::SPAWN_FAILURE,
            AgentError::Stream(_) => exit_codes::TRANSPORT_FAILURE,
            AgentError::Transport(_) => exit_codes::TRANSPORT_FAILURE,
            AgentError::Sink(_) => exit_codes::TRANSPORT_FAILURE,
            AgentError::Lock(_) => exit_codes::LOCK_FAILURE,
        }
    }
}

/// Result type alias for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;
