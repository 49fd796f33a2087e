//! Implementation of the `fleet-agent config` command.

use crate::config::AgentConfig;
use crate::error::Result;
use crate::exit_codes;

pub fn cmd_config(config: &AgentConfig) -> Result<i32> {
    print!("{}", config.to_yaml()?);
    Ok(exit_codes::SUCCESS)
}
