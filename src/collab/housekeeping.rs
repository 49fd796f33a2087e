//! Periodic agent registration.

use super::inventory::ContainerInventory;
use super::transport::Transport;
use crate::error::Result;
use crate::response::Response;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const REGISTRATION_TOPIC: &str = "heartbeat";

/// Periodic work serviced at the top of every dispatch iteration.
pub trait Housekeeping {
    fn service(&mut self, transport: &mut dyn Transport) -> Result<()>;

    /// A registration cycle is under way; admissions wait for it.
    fn heartbeat_pending(&self) -> bool;
}

/// Sends the agent's registration heartbeat every `interval`.
///
/// When the interval elapses the heartbeat becomes pending; the next service
/// call refreshes the inventory, sends the registration, and clears it.
pub struct RegistrationTimer {
    agent_id: String,
    interval: Duration,
    last_sent: Option<Instant>,
    pending: bool,
    inventory: Arc<dyn ContainerInventory>,
}

impl RegistrationTimer {
    pub fn new(
        agent_id: impl Into<String>,
        interval: Duration,
        inventory: Arc<dyn ContainerInventory>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            interval,
            last_sent: None,
            pending: false,
            inventory,
        }
    }
}

impl Housekeeping for RegistrationTimer {
    fn service(&mut self, transport: &mut dyn Transport) -> Result<()> {
        let now = Instant::now();

        if self.pending {
            self.pending = false;
            self.last_sent = Some(now);

            let count = self.inventory.refresh()?;
            let registration =
                Response::registration(&self.agent_id, self.inventory.container_ids());
            transport.send(&registration, Some(REGISTRATION_TOPIC))?;
            tracing::debug!(containers = count, "registration heartbeat sent");
            return Ok(());
        }

        let due = self
            .last_sent
            .is_none_or(|last| now.duration_since(last) >= self.interval);
        if due {
            self.pending = true;
        }
        Ok(())
    }

    fn heartbeat_pending(&self) -> bool {
        self.pending
    }
}
