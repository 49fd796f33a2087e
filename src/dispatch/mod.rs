//! Dispatch Loop / Admission Controller.
//!
//! One thread runs [`DispatchLoop::run_iteration`] repeatedly. Each iteration
//! does a bounded amount of work in a fixed order:
//!
//! 1. service housekeeping (registration heartbeat)
//! 2. reap finished sessions
//! 3. forward filesystem-watch changes
//! 4. poll the transport, reconnecting when asked
//! 5. handle one control command, bypassing every gate; the iteration ends here
//! 6. hold execution commands while the container manager is locked
//! 7. hold them while a registration heartbeat is pending
//! 8. admit at most one execution command if below the session cap
//!
//! Held commands stay queued on the transport and are looked at again on the
//! next iteration. The duplicate ledger and the live-session list are owned by
//! this loop and need no locking.

mod control;


use crate::collab::{ContainerInventory, FsWatcher, Housekeeping, Transport};
use crate::command::Command;
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::events::{Event, EventAction, EventLog};
use crate::exec::{self, ExecutionTarget, SessionHandle, SessionOutcome, SupervisorSettings};
use crate::ledger::DuplicateLedger;
use crate::response::Response;
use crate::sink::OutboundSink;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Topic for direct replies to control commands.
pub const RESPONSE_TOPIC: &str = "response";

/// Topic for filesystem-watch notifications.
pub const WATCH_TOPIC: &str = "inotify";

/// The outside world as seen by the dispatch loop.
pub struct Collaborators {
    pub transport: Box<dyn Transport>,
    pub inventory: Arc<dyn ContainerInventory>,
    pub watcher: Box<dyn FsWatcher>,
    pub housekeeping: Box<dyn Housekeeping>,
}

/// Why an execution command was left queued this iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    ManagerLocked,
    HeartbeatPending,
    AtCapacity,
}

/// What one iteration did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Iteration {
    /// Ids of sessions reaped this iteration.
    pub reaped: Vec<String>,
    /// Watch changes forwarded.
    pub watch_events: usize,
    /// Control command handled.
    pub control: Option<String>,
    /// Execution command admitted.
    pub admitted: Option<String>,
    /// Command discarded as a duplicate.
    pub duplicate: Option<String>,
    /// Command answered with an error instead of running.
    pub rejected: Option<String>,
    /// Set only when an execution command was waiting.
    pub gated: Option<Gate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdmissionClass {
    Control,
    Execution,
}

#[derive(Debug)]
struct LiveSession {
    handle: SessionHandle,
    class: AdmissionClass,
}

pub struct DispatchLoop {
    agent_id: String,
    max_sessions: usize,
    transport_poll: Duration,
    settings: SupervisorSettings,
    collab: Collaborators,
    sink: Arc<dyn OutboundSink>,
    ledger: DuplicateLedger,
    sessions: Vec<LiveSession>,
    events: EventLog,
}

impl DispatchLoop {
    pub fn new(config: &AgentConfig, collab: Collaborators, sink: Arc<dyn OutboundSink>) -> Self {
        Self {
            agent_id: config.agent_id.clone(),
            max_sessions: config.max_sessions,
            transport_poll: Duration::from_millis(config.transport_poll_ms),
            settings: config.supervisor_settings(),
            collab,
            sink,
            ledger: DuplicateLedger::new(config.duplicate_window),
            sessions: Vec::new(),
            events: EventLog::new(config.event_log.clone()),
        }
    }

    pub fn with_event_log(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }

    /// Sessions not yet reaped, of either class.
    pub fn live_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Sessions counted against the cap.
    pub fn execution_sessions(&self) -> usize {
        self.sessions
            .iter()
            .filter(|s| s.class == AdmissionClass::Execution)
            .count()
    }

    /// Run iterations until `shutdown` is set, `max_iterations` is reached,
    /// or the transport is closed with nothing left running. Live sessions
    /// are joined before returning. Returns the number of iterations run.
    pub fn run(&mut self, shutdown: &AtomicBool, max_iterations: Option<u64>) -> Result<u64> {
        self.events.record(Event::new(EventAction::AgentStart).with_details(json!({
            "agent_id": self.agent_id,
            "max_sessions": self.max_sessions,
        })));
        tracing::info!(
            agent_id = %self.agent_id,
            max_sessions = self.max_sessions,
            "dispatch loop started"
        );

        let mut iterations = 0;
        let result = loop {
            if shutdown.load(Ordering::SeqCst) {
                tracing::info!("shutdown requested");
                break Ok(());
            }
            if max_iterations.is_some_and(|max| iterations >= max) {
                break Ok(());
            }
            if self.collab.transport.is_closed() && self.sessions.is_empty() {
                tracing::info!("transport closed and no sessions remain");
                break Ok(());
            }
            if let Err(e) = self.run_iteration() {
                break Err(e);
            }
            iterations += 1;
        };

        self.drain();
        self.events.record(
            Event::new(EventAction::AgentStop).with_details(json!({ "iterations": iterations })),
        );
        result.map(|()| iterations)
    }

    /// Perform one pass of the admission state machine.
    pub fn run_iteration(&mut self) -> Result<Iteration> {
        let mut iteration = Iteration::default();

        if let Err(e) = self
            .collab
            .housekeeping
            .service(self.collab.transport.as_mut())
        {
            tracing::warn!(error = %e, "housekeeping failed");
        }

        iteration.reaped = self.reap();
        iteration.watch_events = self.forward_watch_events()?;

        self.collab.transport.poll(self.transport_poll)?;
        if self.collab.transport.is_reconnect_needed() {
            tracing::info!("transport requested reconnect");
            if let Err(e) = self.collab.transport.reconnect() {
                tracing::warn!(error = %e, "reconnect failed; retrying next iteration");
            }
        }

        if let Some(command) = self.collab.transport.receive_control_message() {
            if self.is_duplicate(&command) {
                iteration.duplicate = Some(command.id);
                return Ok(iteration);
            }
            iteration.control = Some(command.id.clone());
            self.handle_control(command, &mut iteration)?;
            return Ok(iteration);
        }

        if !self.collab.transport.has_execution_message() {
            return Ok(iteration);
        }
        if self.collab.inventory.is_locked() {
            tracing::debug!("container manager locked; holding execution commands");
            iteration.gated = Some(Gate::ManagerLocked);
            return Ok(iteration);
        }
        if self.collab.housekeeping.heartbeat_pending() {
            tracing::debug!("registration pending; holding execution commands");
            iteration.gated = Some(Gate::HeartbeatPending);
            return Ok(iteration);
        }
        if self.execution_sessions() >= self.max_sessions {
            tracing::debug!(
                live = self.execution_sessions(),
                cap = self.max_sessions,
                "at session cap"
            );
            iteration.gated = Some(Gate::AtCapacity);
            return Ok(iteration);
        }

        let Some(command) = self.collab.transport.receive_execution_message() else {
            return Ok(iteration);
        };
        if self.is_duplicate(&command) {
            iteration.duplicate = Some(command.id);
            return Ok(iteration);
        }
        self.admit(command, AdmissionClass::Execution, &mut iteration)?;
        Ok(iteration)
    }

    fn is_duplicate(&mut self, command: &Command) -> bool {
        if !self.ledger.check_and_record(&command.id) {
            return false;
        }
        tracing::debug!(command_id = %command.id, kind = %command.kind, "duplicate command discarded");
        self.events
            .record(Event::new(EventAction::Duplicate).with_command(&command.id));
        true
    }

    fn reap(&mut self) -> Vec<String> {
        let (finished, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.sessions)
            .into_iter()
            .partition(|s| s.handle.is_finished());
        self.sessions = live;

        finished
            .into_iter()
            .map(|session| self.record_reap(session))
            .collect()
    }

    fn record_reap(&self, session: LiveSession) -> String {
        let command_id = session.handle.command_id().to_string();
        let pid = session.handle.pid();
        let outcome = session.handle.join();

        match &outcome {
            SessionOutcome::Failed(reason) => {
                tracing::warn!(command_id = %command_id, pid, reason = %reason, "session failed")
            }
            other => tracing::info!(command_id = %command_id, pid, outcome = ?other, "session reaped"),
        }
        self.events.record(
            Event::new(EventAction::Reap)
                .with_command(&command_id)
                .with_details(json!({ "pid": pid, "outcome": format!("{:?}", outcome) })),
        );
        command_id
    }

    /// Wait for every live session to finish.
    fn drain(&mut self) {
        if !self.sessions.is_empty() {
            tracing::info!(live = self.sessions.len(), "waiting for live sessions");
        }
        for session in std::mem::take(&mut self.sessions) {
            self.record_reap(session);
        }
    }

    fn forward_watch_events(&mut self) -> Result<usize> {
        let changes = match self.collab.watcher.poll() {
            Ok(changes) => changes,
            Err(e) => {
                tracing::warn!(error = %e, "watch poll failed");
                return Ok(0);
            }
        };

        for change in &changes {
            let response = Response::watch_event(
                &self.agent_id,
                change.path.display().to_string(),
                change.action.as_str(),
            );
            self.collab.transport.send(&response, Some(WATCH_TOPIC))?;
        }
        Ok(changes.len())
    }

    /// The host itself for an empty id or the agent's own id; otherwise a
    /// container from the inventory.
    fn resolve_target(&self, target_id: &str) -> Result<ExecutionTarget> {
        if target_id.is_empty() || target_id == self.agent_id {
            return Ok(ExecutionTarget::Local);
        }
        self.collab
            .inventory
            .find_target_by_id(target_id)
            .ok_or_else(|| AgentError::UserError(format!("unknown target '{}'", target_id)))
    }

    /// Validate, resolve and launch; failures are answered instead of run.
    fn admit(
        &mut self,
        command: Command,
        class: AdmissionClass,
        iteration: &mut Iteration,
    ) -> Result<()> {
        let target = match command
            .validate()
            .and_then(|()| self.resolve_target(&command.target_id))
        {
            Ok(target) => target,
            Err(e) => {
                iteration.rejected = Some(command.id.clone());
                return self.reject(&command, &e);
            }
        };

        let command_id = command.id.clone();
        let label = target.label().to_string();
        match exec::launch(command, target, Arc::clone(&self.sink), self.settings.clone()) {
            Ok(handle) => {
                tracing::info!(command_id = %command_id, target = %label, class = ?class, "command admitted");
                self.events.record(
                    Event::new(EventAction::Admit)
                        .with_command(&command_id)
                        .with_details(json!({ "target": label })),
                );
                self.sessions.push(LiveSession { handle, class });
                if class == AdmissionClass::Execution {
                    iteration.admitted = Some(command_id);
                }
            }
            Err(e) => {
                tracing::error!(command_id = %command_id, target = %label, error = %e, "spawn failed");
                self.events.record(
                    Event::new(EventAction::SpawnFailed)
                        .with_command(&command_id)
                        .with_details(json!({ "error": e.to_string() })),
                );
            }
        }
        Ok(())
    }

    /// Answer a command that will not run with an error chunk and DONE(1).
    ///
    /// Sent on the transport directly: the loop never waits on the outbound
    /// queue, which may be full of session output.
    fn reject(&mut self, command: &Command, error: &AgentError) -> Result<()> {
        tracing::warn!(command_id = %command.id, error = %error, "command rejected");
        self.events.record(
            Event::new(EventAction::Reject)
                .with_command(&command.id)
                .with_details(json!({ "error": error.to_string() })),
        );
        let chunk = Response::chunk(command, 0, 1, String::new(), error.to_string());
        self.collab.transport.send(&chunk, Some(RESPONSE_TOPIC))?;
        self.collab
            .transport
            .send(&Response::done(command, 0, 2, 1), Some(RESPONSE_TOPIC))
    }
}
