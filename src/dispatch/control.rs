//! Control-channel command handlers.

use super::{AdmissionClass, DispatchLoop, Iteration, RESPONSE_TOPIC};
use crate::command::{Command, CommandKind, OutputMode};
use crate::error::Result;
use crate::events::{Event, EventAction};
use crate::exec::supervisor::kill_pid;
use crate::response::{Response, ResponseKind};
use serde_json::json;

/// Processes on the target, one per line, with their parents and run time.
const PROCESS_LIST_SCRIPT: &str = "ps -eo user,pid,ppid,etime,args";

impl DispatchLoop {
    pub(super) fn handle_control(
        &mut self,
        command: Command,
        iteration: &mut Iteration,
    ) -> Result<()> {
        tracing::debug!(command_id = %command.id, kind = %command.kind, "control command");

        match command.kind {
            CommandKind::ProcessList => self.list_processes(command, iteration),
            CommandKind::Terminate => self.terminate(&command),
            CommandKind::SetWatch => self.set_watches(&command),
            CommandKind::UnsetWatch => self.unset_watches(&command),
            CommandKind::ListWatches => self.list_watches(&command),
            CommandKind::Execute => {
                tracing::warn!(command_id = %command.id, "execute command on control channel ignored");
                Ok(())
            }
        }
    }

    /// Runs the listing as an ordinary session that does not count toward the cap.
    fn list_processes(&mut self, command: Command, iteration: &mut Iteration) -> Result<()> {
        let listing = Command::execute(command.id, command.target_id, PROCESS_LIST_SCRIPT)
            .with_working_directory("/")
            .with_modes(OutputMode::Return, OutputMode::No)
            .with_request_seq(command.request_seq);
        self.admit(listing, AdmissionClass::Control, iteration)
    }

    fn terminate(&mut self, command: &Command) -> Result<()> {
        let pid = command.pid.unwrap_or(0);
        let delivered = pid > 0 && kill_pid(pid as u32);
        let reported = pid.max(0) as u32;

        let response = if delivered {
            tracing::info!(command_id = %command.id, pid, "process terminated");
            Response::terminate_done(command, reported)
        } else {
            tracing::warn!(command_id = %command.id, pid, "terminate failed");
            Response::terminate_failed(command, reported)
        };
        self.events.record(
            Event::new(EventAction::Terminate)
                .with_command(&command.id)
                .with_details(json!({ "pid": pid, "delivered": delivered })),
        );
        self.collab.transport.send(&response, Some(RESPONSE_TOPIC))
    }

    fn set_watches(&mut self, command: &Command) -> Result<()> {
        let added = match self.resolve_target(&command.target_id) {
            Ok(target) => command
                .watch_paths
                .iter()
                .filter(|path| match self.collab.watcher.add_watch(&target.host_path(path)) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(command_id = %command.id, path = %path, error = %e, "watch not added");
                        false
                    }
                })
                .cloned()
                .collect(),
            Err(e) => {
                tracing::warn!(command_id = %command.id, error = %e, "watch target not found");
                Vec::new()
            }
        };

        self.events.record(
            Event::new(EventAction::WatchSet)
                .with_command(&command.id)
                .with_details(json!({ "paths": added })),
        );
        let response = Response::watch(ResponseKind::SetWatchResponse, command, added);
        self.collab.transport.send(&response, Some(RESPONSE_TOPIC))
    }

    fn unset_watches(&mut self, command: &Command) -> Result<()> {
        let mut removed = Vec::new();
        if let Ok(target) = self.resolve_target(&command.target_id) {
            for path in &command.watch_paths {
                if self.collab.watcher.remove_watch(&target.host_path(path))? {
                    removed.push(path.clone());
                }
            }
        }

        self.events.record(
            Event::new(EventAction::WatchUnset)
                .with_command(&command.id)
                .with_details(json!({ "paths": removed })),
        );
        let response = Response::watch(ResponseKind::UnsetWatchResponse, command, removed);
        self.collab.transport.send(&response, Some(RESPONSE_TOPIC))
    }

    fn list_watches(&mut self, command: &Command) -> Result<()> {
        let watched = self
            .collab
            .watcher
            .watched()
            .iter()
            .map(|path| path.display().to_string())
            .collect();
        let response = Response::watch(ResponseKind::WatchListResponse, command, watched);
        self.collab.transport.send(&response, Some(RESPONSE_TOPIC))
    }
}
