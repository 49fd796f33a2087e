//! CLI argument parsing for fleet-agent.
//!
//! Uses clap derive macros for declarative argument definitions.
//! Implementations live in the `commands` module.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Resource-host agent that runs fleet commands on the host or inside LXC containers.
///
/// Commands arrive as NDJSON on stdin; responses leave as NDJSON on stdout.
/// Logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "fleet-agent")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the agent configuration file (YAML).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the dispatch loop over stdin/stdout.
    ///
    /// Reads commands until stdin closes or SIGINT/SIGTERM arrives, then
    /// waits for running sessions to finish.
    Run(RunArgs),

    /// Run one command on this host and print its responses.
    Exec(ExecArgs),

    /// Print the effective configuration as YAML.
    Config,

    /// Inspect or manage the container-manager lock.
    Lock(LockCommand),
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Stop after this many dispatch iterations.
    #[arg(long)]
    pub max_iterations: Option<u64>,
}

#[derive(Parser, Debug)]
pub struct ExecArgs {
    /// Program and arguments, joined into one shell string.
    #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
    pub program: Vec<String>,

    /// Working directory.
    #[arg(long)]
    pub cwd: Option<String>,

    /// Run as this user.
    #[arg(long)]
    pub run_as: Option<String>,

    /// Timeout in seconds (0 disables).
    #[arg(long, default_value_t = 0)]
    pub timeout: u64,

    /// Output mode for stdout (NO, CAPTURE, RETURN, CAPTURE_AND_RETURN).
    #[arg(long, default_value = "RETURN")]
    pub stdout: String,

    /// Output mode for stderr.
    #[arg(long, default_value = "RETURN")]
    pub stderr: String,

    /// Environment variable for the worker (NAME=VALUE), repeatable.
    #[arg(long = "env", value_name = "NAME=VALUE")]
    pub env: Vec<String>,

    /// Command id reported in responses.
    #[arg(long, default_value = "exec")]
    pub id: String,
}

#[derive(Parser, Debug)]
pub struct LockCommand {
    #[command(subcommand)]
    pub action: LockAction,
}

#[derive(Subcommand, Debug)]
pub enum LockAction {
    /// Show whether the lock is held, and by whom.
    Status,

    /// Remove the lock file.
    Clear(LockClearArgs),

    /// Hold the lock for a while (maintenance windows, testing).
    Hold(LockHoldArgs),
}

#[derive(Parser, Debug)]
pub struct LockClearArgs {
    /// Clear even if the lock is not stale.
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
pub struct LockHoldArgs {
    /// Seconds to hold the lock.
    #[arg(long, default_value_t = 60)]
    pub secs: u64,
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
