//! Command transport.

use crate::command::Command;
use crate::error::{AgentError, Result};
use crate::response::Response;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Inbound command channels plus the outbound side for direct replies.
///
/// Control commands (`CommandKind::is_control`) arrive on the priority
/// channel; everything else on the execution channel.
pub trait Transport {
    /// Wait up to `timeout` for inbound traffic.
    fn poll(&mut self, timeout: Duration) -> Result<()>;

    fn receive_control_message(&mut self) -> Option<Command>;

    /// Whether an execution-channel command is waiting, without consuming it.
    fn has_execution_message(&self) -> bool;

    fn receive_execution_message(&mut self) -> Option<Command>;

    fn send(&mut self, response: &Response, topic: Option<&str>) -> Result<()>;

    fn is_reconnect_needed(&self) -> bool;

    fn reconnect(&mut self) -> Result<()>;

    /// No further commands will ever arrive.
    fn is_closed(&self) -> bool {
        false
    }
}

#[derive(Debug, Default)]
struct Queues {
    control: VecDeque<Command>,
    execution: VecDeque<Command>,
}

impl Queues {
    fn push(&mut self, command: Command) {
        if command.kind.is_control() {
            self.control.push_back(command);
        } else {
            self.execution.push_back(command);
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    queues: Queues,
    sent: Vec<(Response, Option<String>)>,
    reconnect_needed: bool,
    reconnects: usize,
    closed: bool,
}

/// In-process transport; clones share the same queues.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Queue a command on the channel matching its kind.
    pub fn submit(&self, command: Command) {
        self.state().queues.push(command);
    }

    /// Responses sent directly through the transport, with their topics.
    pub fn sent(&self) -> Vec<(Response, Option<String>)> {
        self.state().sent.clone()
    }

    pub fn request_reconnect(&self) {
        self.state().reconnect_needed = true;
    }

    pub fn reconnects(&self) -> usize {
        self.state().reconnects
    }

    pub fn pending_execution(&self) -> usize {
        self.state().queues.execution.len()
    }

    pub fn close(&self) {
        self.state().closed = true;
    }
}

impl Transport for MemoryTransport {
    /// Sleeps for `timeout` only when nothing is queued.
    fn poll(&mut self, timeout: Duration) -> Result<()> {
        let idle = {
            let state = self.state();
            state.queues.control.is_empty() && state.queues.execution.is_empty()
        };
        if idle {
            thread::sleep(timeout);
        }
        Ok(())
    }

    fn receive_control_message(&mut self) -> Option<Command> {
        self.state().queues.control.pop_front()
    }

    fn has_execution_message(&self) -> bool {
        !self.state().queues.execution.is_empty()
    }

    fn receive_execution_message(&mut self) -> Option<Command> {
        self.state().queues.execution.pop_front()
    }

    fn send(&mut self, response: &Response, topic: Option<&str>) -> Result<()> {
        self.state()
            .sent
            .push((response.clone(), topic.map(str::to_string)));
        Ok(())
    }

    fn is_reconnect_needed(&self) -> bool {
        self.state().reconnect_needed
    }

    fn reconnect(&mut self) -> Result<()> {
        let mut state = self.state();
        state.reconnect_needed = false;
        state.reconnects += 1;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        let state = self.state();
        state.closed && state.queues.control.is_empty() && state.queues.execution.is_empty()
    }
}

/// Line-oriented writer shared between the transport and the sink forwarder.
#[derive(Clone)]
pub struct SharedWriter {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl SharedWriter {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Write one response as an NDJSON line and flush.
    pub fn write_response(&self, response: &Response) -> Result<()> {
        let line = response.to_json()?;
        let mut writer = self
            .inner
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        writeln!(writer, "{}", line)
            .and_then(|()| writer.flush())
            .map_err(|e| AgentError::Transport(format!("failed to write response: {}", e)))
    }
}

impl std::fmt::Debug for SharedWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedWriter").finish_non_exhaustive()
    }
}

/// NDJSON transport: one command per input line, one response per output line.
///
/// Input is read on a background thread so `poll` never blocks past its
/// timeout. Malformed lines are logged and skipped.
#[derive(Debug)]
pub struct StdioTransport {
    inbound: Receiver<Command>,
    queues: Queues,
    writer: SharedWriter,
    input_closed: bool,
}

impl StdioTransport {
    pub fn new<R>(reader: R, writer: SharedWriter) -> Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let (sender, inbound) = crossbeam_channel::unbounded();

        thread::Builder::new()
            .name("stdio-reader".to_string())
            .spawn(move || {
                for line in reader.lines() {
                    let line = match line {
                        Ok(line) => line,
                        Err(e) => {
                            tracing::warn!(error = %e, "stopping command reader");
                            break;
                        }
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match Command::from_json(&line) {
                        Ok(command) => {
                            if sender.send(command).is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "skipping malformed command line"),
                    }
                }
                tracing::debug!("command input closed");
            })
            .map_err(|e| AgentError::Transport(format!("failed to start stdin reader: {}", e)))?;

        Ok(Self {
            inbound,
            queues: Queues::default(),
            writer,
            input_closed: false,
        })
    }

    /// Transport over the process's stdin and stdout.
    pub fn stdio() -> Result<Self> {
        let stdin = std::io::BufReader::new(std::io::stdin());
        Self::new(stdin, SharedWriter::new(std::io::stdout()))
    }

    /// Writer for the sink forwarder; shares the output stream.
    pub fn writer(&self) -> SharedWriter {
        self.writer.clone()
    }
}

impl Transport for StdioTransport {
    fn poll(&mut self, timeout: Duration) -> Result<()> {
        if self.input_closed {
            // Keep the loop paced once input has ended.
            thread::sleep(timeout);
            return Ok(());
        }

        match self.inbound.recv_timeout(timeout) {
            Ok(command) => self.queues.push(command),
            Err(RecvTimeoutError::Timeout) => return Ok(()),
            Err(RecvTimeoutError::Disconnected) => {
                self.input_closed = true;
                return Ok(());
            }
        }
        for command in self.inbound.try_iter() {
            self.queues.push(command);
        }
        Ok(())
    }

    fn receive_control_message(&mut self) -> Option<Command> {
        self.queues.control.pop_front()
    }

    fn has_execution_message(&self) -> bool {
        !self.queues.execution.is_empty()
    }

    fn receive_execution_message(&mut self) -> Option<Command> {
        self.queues.execution.pop_front()
    }

    fn send(&mut self, response: &Response, topic: Option<&str>) -> Result<()> {
        tracing::debug!(kind = ?response.kind, topic = topic.unwrap_or("-"), "sending response");
        self.writer.write_response(response)
    }

    fn is_reconnect_needed(&self) -> bool {
        false
    }

    fn reconnect(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.input_closed
            && self.queues.control.is_empty()
            && self.queues.execution.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandKind;
    use std::io::Cursor;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn memory_transport_classifies_by_kind() {
        let transport = MemoryTransport::new();
        transport.submit(Command::execute("e1", "h", "true"));
        transport.submit(Command::control("t1", "h", CommandKind::Terminate).with_pid(5));

        let mut handle = transport.clone();
        assert!(handle.has_execution_message());
        assert_eq!(handle.receive_control_message().unwrap().id, "t1");
        assert!(handle.receive_control_message().is_none());
        assert_eq!(handle.receive_execution_message().unwrap().id, "e1");
        assert!(!handle.has_execution_message());
    }

    #[test]
    fn memory_transport_records_sends_and_reconnects() {
        let transport = MemoryTransport::new();
        let mut handle = transport.clone();
        let command = Command::control("t1", "h", CommandKind::Terminate);

        handle
            .send(&Response::terminate_failed(&command, 0), Some("response"))
            .unwrap();
        transport.request_reconnect();
        assert!(handle.is_reconnect_needed());
        handle.reconnect().unwrap();

        assert!(!handle.is_reconnect_needed());
        assert_eq!(transport.reconnects(), 1);
        assert_eq!(transport.sent()[0].1.as_deref(), Some("response"));
    }

    #[test]
    fn stdio_transport_reads_ndjson_commands() {
        let input = concat!(
            r#"{"id":"e1","kind":"EXECUTE_REQUEST","program":"echo hi"}"#,
            "\n\nnot json\n",
            r#"{"id":"p1","kind":"PS_REQUEST"}"#,
            "\n"
        );
        let mut transport =
            StdioTransport::new(Cursor::new(input), SharedWriter::new(Buffer::default())).unwrap();

        for _ in 0..100 {
            transport.poll(Duration::from_millis(20)).unwrap();
            if transport.input_closed {
                break;
            }
        }
        assert!(transport.input_closed);
        // Queued commands keep the transport open until consumed.
        assert!(!transport.is_closed());

        assert_eq!(transport.receive_control_message().unwrap().id, "p1");
        assert_eq!(transport.receive_execution_message().unwrap().id, "e1");
        assert!(transport.is_closed());
    }

    #[test]
    fn stdio_transport_writes_response_lines() {
        let buffer = Buffer::default();
        let mut transport =
            StdioTransport::new(Cursor::new(""), SharedWriter::new(buffer.clone())).unwrap();
        let command = Command::execute("c1", "h", "true");

        transport
            .send(&Response::done(&command, 1, 2, 0), None)
            .unwrap();
        transport
            .writer()
            .write_response(&Response::timeout(&command, 1, 3))
            .unwrap();

        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("EXECUTE_RESPONSE_DONE"));
        assert!(lines[1].contains("EXECUTE_TIMEOUT"));
    }
}
