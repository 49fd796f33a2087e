//! Implementation of the `fleet-agent exec` command.
//!
//! Runs a single command through the Process Supervisor on this host and
//! prints every response as an NDJSON line, the same way `run` would send it.

use crate::cli::ExecArgs;
use crate::collab::SharedWriter;
use crate::command::{Command, OutputMode};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::exec::{ExecutionTarget, SessionOutcome, launch};
use crate::sink::{ChannelSink, spawn_forwarder};
use std::sync::Arc;

/// Exit status reported when the command timed out, as timeout(1) does.
const TIMEOUT_EXIT: i32 = 124;

pub fn cmd_exec(args: ExecArgs, config: AgentConfig) -> Result<i32> {
    let command = build_command(args, &config)?;
    command.validate()?;

    let (sink, receiver) = ChannelSink::bounded(config.sink_capacity, config.sink_send_timeout());
    let writer = SharedWriter::new(std::io::stdout());
    let forwarder = spawn_forwarder(receiver, move |response| writer.write_response(&response))?;

    let handle = launch(
        command,
        ExecutionTarget::Local,
        Arc::new(sink),
        config.supervisor_settings(),
    )?;
    let outcome = handle.join();
    let _ = forwarder.join();

    match outcome {
        SessionOutcome::Done(code) | SessionOutcome::Background(code) => Ok(code),
        SessionOutcome::TimedOut => Ok(TIMEOUT_EXIT),
        SessionOutcome::Failed(reason) => Err(AgentError::Stream(reason)),
    }
}

fn parse_mode(value: &str) -> Result<OutputMode> {
    OutputMode::from_str(&value.to_ascii_uppercase()).ok_or_else(|| {
        AgentError::UserError(format!(
            "invalid output mode '{}' (expected NO, CAPTURE, RETURN or CAPTURE_AND_RETURN)",
            value
        ))
    })
}

fn build_command(args: ExecArgs, config: &AgentConfig) -> Result<Command> {
    let stdout = parse_mode(&args.stdout)?;
    let stderr = parse_mode(&args.stderr)?;

    let mut words = args.program.into_iter();
    let program = words.next().unwrap_or_default();
    let mut command = Command::execute(args.id, config.agent_id.clone(), program)
        .with_args(words)
        .with_modes(stdout, stderr)
        .with_timeout(args.timeout);

    if let Some(cwd) = args.cwd {
        command = command.with_working_directory(cwd);
    }
    if let Some(user) = args.run_as {
        command = command.with_run_as(user);
    }
    for pair in args.env {
        let (name, value) = pair.split_once('=').ok_or_else(|| {
            AgentError::UserError(format!("invalid --env '{}': expected NAME=VALUE", pair))
        })?;
        command = command.with_env(name, value);
    }
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command as CliCommand};
    use clap::Parser;

    fn exec_args(argv: &[&str]) -> ExecArgs {
        let mut full = vec!["fleet-agent", "exec"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            CliCommand::Exec(args) => args,
            other => panic!("Expected Exec command, got {:?}", other),
        }
    }

    #[test]
    fn builds_command_from_args() {
        let config = AgentConfig {
            agent_id: "rh-01".to_string(),
            ..AgentConfig::default()
        };
        let args = exec_args(&[
            "--cwd", "/tmp", "--stdout", "capture_and_return", "--env", "GREETING=a=b", "echo",
            "$GREETING",
        ]);

        let command = build_command(args, &config).unwrap();
        assert_eq!(command.target_id, "rh-01");
        assert_eq!(command.exec_string(), "echo $GREETING");
        assert_eq!(command.working_directory, "/tmp");
        assert_eq!(command.stdout_mode, OutputMode::CaptureAndReturn);
        assert_eq!(
            command.environment,
            vec![("GREETING".to_string(), "a=b".to_string())]
        );
    }

    #[test]
    fn rejects_bad_mode_and_env() {
        let config = AgentConfig::default();

        let err = build_command(exec_args(&["--stdout", "LOUD", "true"]), &config).unwrap_err();
        assert!(err.to_string().contains("invalid output mode 'LOUD'"));

        let err = build_command(exec_args(&["--env", "NOVALUE", "true"]), &config).unwrap_err();
        assert!(err.to_string().contains("expected NAME=VALUE"));
    }
}
