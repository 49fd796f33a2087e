//! Configuration model for the fleet agent.
//!
//! This module defines the `AgentConfig` struct read from the agent's YAML
//! configuration file. It supports forward-compatible YAML parsing (unknown
//! fields are ignored), defaults for every field, and validation of values.

mod model;
mod operations;
pub mod types;


// Re-export public API
pub use model::AgentConfig;
