//! Outbound message sink.
//!
//! Sessions push responses into a bounded queue; one forwarder thread drains
//! it into the transport. A full queue blocks the pushing session, so a slow
//! transport throttles command output instead of growing memory.

use crate::error::{AgentError, Result};
use crate::response::Response;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Destination for responses produced by sessions and control handlers.
pub trait OutboundSink: Send + Sync {
    /// Enqueue one response, blocking until it is accepted.
    fn push(&self, response: Response) -> Result<()>;
}

/// Sink backed by a bounded crossbeam channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<Response>,
    send_timeout: Option<Duration>,
}

impl ChannelSink {
    /// Create a sink holding at most `capacity` undelivered responses.
    ///
    /// With `send_timeout` set, a push that cannot be accepted in time fails
    /// instead of blocking forever.
    pub fn bounded(capacity: usize, send_timeout: Option<Duration>) -> (Self, Receiver<Response>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        (
            Self {
                sender,
                send_timeout,
            },
            receiver,
        )
    }
}

impl OutboundSink for ChannelSink {
    fn push(&self, response: Response) -> Result<()> {
        let command_id = response.command_id.clone();
        match self.send_timeout {
            None => self.sender.send(response).map_err(|_| {
                AgentError::Sink(format!(
                    "outbound queue closed while sending response for '{}'",
                    command_id
                ))
            }),
            Some(timeout) => self
                .sender
                .send_timeout(response, timeout)
                .map_err(|e| match e {
                    SendTimeoutError::Timeout(_) => AgentError::Sink(format!(
                        "outbound queue full for {}ms while sending response for '{}'",
                        timeout.as_millis(),
                        command_id
                    )),
                    SendTimeoutError::Disconnected(_) => AgentError::Sink(format!(
                        "outbound queue closed while sending response for '{}'",
                        command_id
                    )),
                }),
        }
    }
}

/// Drain `receiver` on a dedicated thread, handing each response to `deliver`.
///
/// The thread exits once every sender has been dropped. Delivery failures
/// are logged and the response is dropped.
pub fn spawn_forwarder<F>(receiver: Receiver<Response>, mut deliver: F) -> Result<JoinHandle<()>>
where
    F: FnMut(Response) -> Result<()> + Send + 'static,
{
    thread::Builder::new()
        .name("sink-forwarder".to_string())
        .spawn(move || {
            for response in receiver.iter() {
                let command_id = response.command_id.clone();
                if let Err(e) = deliver(response) {
                    tracing::warn!(command_id = %command_id, error = %e, "dropping response");
                }
            }
            tracing::debug!("outbound queue closed; forwarder exiting");
        })
        .map_err(|e| AgentError::Io(format!("failed to start sink forwarder: {}", e)))
}
