//! fleet-agent: runs fleet commands on a resource host or inside its LXC containers.
//!
//! This is the entry point for the `fleet-agent` CLI. It parses arguments,
//! loads configuration, initialises logging, dispatches to the command
//! handler, and maps errors to exit codes.

mod cli;
mod collab;
mod command;
mod commands;
mod config;
mod dispatch;
mod error;
mod events;
mod exec;
mod exit_codes;
mod ledger;
mod locks;
mod logging;
mod response;
mod sink;

#[cfg(test)]
mod test_support;

use cli::Cli;
use config::AgentConfig;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    let config = match AgentConfig::load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {}", err);
            return ExitCode::from(err.exit_code() as u8);
        }
    };
    logging::init(&config.log_level, cli.verbose);

    match commands::dispatch(cli, config) {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            eprintln!("Error: {}", err);
            ExitCode::from(err.exit_code() as u8)
        }
    }
}
