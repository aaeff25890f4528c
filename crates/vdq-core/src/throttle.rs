//! Per-requester inbound rate limit.
//!
//! A requester may send at most one event per `interval`; faster events are
//! dropped. Cancels bypass this (the engine never calls `check` for them).

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::gateway::RequesterId;

pub struct RequestThrottle {
    interval: Duration,
    last: Mutex<HashMap<RequesterId, Instant>>,
}

impl RequestThrottle {
    /// A zero interval disables throttling.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Records an event for `requester`; returns false if it came too soon.
    /// Dropped events do not extend the window.
    pub fn check(&self, requester: RequesterId) -> bool {
        if self.interval.is_zero() {
            return true;
        }
        let now = Instant::now();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match last.get(&requester) {
            Some(&prev) if now.duration_since(prev) < self.interval => {
                tracing::debug!(requester, "event throttled");
                false
            }
            _ => {
                last.insert(requester, now);
                true
            }
        }
    }

    /// Forget requesters idle for longer than the interval.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let before = last.len();
        last.retain(|_, t| now.duration_since(*t) < self.interval);
        before - last.len()
    }

    pub fn tracked(&self) -> usize {
        self.last.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
