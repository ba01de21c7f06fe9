//! Event Throttling
//!
//! Minimum inter-arrival interval per throttle key. Keys combine the event
//! kind, the actor, and an optional scope such as the conversation id, so
//! one user's sends do not throttle another conversation or another user.

use dashmap::DashMap;
use std::time::{Duration, Instant};

pub use crate::config::ThrottleSettings;

/// Monotonic-time keyed throttle map.
pub struct ThrottleMap {
    last_seen: DashMap<String, Instant>,
}

impl ThrottleMap {
    pub fn new() -> Self {
        Self {
            last_seen: DashMap::new(),
        }
    }

    /// Record an arrival for `key`. Returns true when the event is allowed,
    /// false when it arrived before `interval` elapsed since the last
    /// allowed arrival.
    pub fn check(&self, key: &str, interval: Duration) -> bool {
        let now = Instant::now();
        let mut allowed = true;
        self.last_seen
            .entry(key.to_string())
            .and_modify(|last| {
                if now.duration_since(*last) < interval {
                    allowed = false;
                } else {
                    *last = now;
                }
            })
            .or_insert(now);
        allowed
    }

    /// Drop keys idle longer than `max_age` to bound memory.
    pub fn sweep(&self, max_age: Duration) {
        let now = Instant::now();
        self.last_seen
            .retain(|_, last| now.duration_since(*last) < max_age);
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

impl Default for ThrottleMap {
    fn default() -> Self {
        Self::new()
    }
}
