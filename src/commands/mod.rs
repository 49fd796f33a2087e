//! Subcommand implementations for fleet-agent.
//!
//! Each handler returns the process exit status on success; errors are
//! mapped to exit codes by `main`.

mod config_cmd;
mod exec;
mod lock;
mod run;

use crate::cli::{Cli, Command};
use crate::config::AgentConfig;
use crate::error::Result;

/// Route a parsed command line to its handler.
pub fn dispatch(cli: Cli, config: AgentConfig) -> Result<i32> {
    match cli.command {
        Command::Run(args) => run::cmd_run(args, config),
        Command::Exec(args) => exec::cmd_exec(args, config),
        Command::Config => config_cmd::cmd_config(&config),
        Command::Lock(lock_cmd) => lock::dispatch_lock(lock_cmd, &config),
    }
}
