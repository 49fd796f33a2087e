//! Elapsed-time counters for execution and heartbeat timeouts.
//!
//! Counters measure monotonic time, so they count real seconds regardless of
//! wall-clock adjustments or how long the supervisor spent between checks.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct SecondsCounter {
    limit: Option<Duration>,
    started: Instant,
}

impl SecondsCounter {
    /// A counter started at `now`; `None` never expires.
    pub fn starting_at(limit: Option<Duration>, now: Instant) -> Self {
        Self {
            limit,
            started: now,
        }
    }

    /// Counter for a timeout given in whole seconds, where 0 disables it.
    pub fn from_secs(secs: u64, now: Instant) -> Self {
        let limit = (secs > 0).then(|| Duration::from_secs(secs));
        Self::starting_at(limit, now)
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    pub fn expired(&self, now: Instant) -> bool {
        self.limit.is_some_and(|limit| self.elapsed(now) >= limit)
    }

    pub fn reset(&mut self, now: Instant) {
        self.started = now;
    }
}
