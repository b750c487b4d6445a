//! # Per-Connection Rate Limiting
//!
//! Fixed-window request quota, one window per connection. The window is
//! anchored to the connection's first request, not to wall-clock minutes, and
//! is reset lazily by the next check after it has elapsed. Nothing sweeps the
//! table in the background; entries are removed when the connection goes away.

use crate::error::RelayError;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Quota bookkeeping for one connection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitState {
    /// Requests admitted in the current window
    pub count: u32,
    /// When the current window ends
    pub reset_at: Instant,
}

/// Thread-safe rate limiter shared by every connection.
///
/// ## Thread Safety:
/// One `Mutex` guards the whole table. Each check holds it for a single
/// hash lookup and an increment, so contention stays negligible.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    states: Mutex<HashMap<String, RateLimitState>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Admit one request for `connection_id` or fail with `RateLimitExceeded`.
    pub fn check(&self, connection_id: &str) -> Result<(), RelayError> {
        self.check_at(connection_id, Instant::now())
    }

    /// Same as [`check`](Self::check) with an explicit clock reading.
    pub fn check_at(&self, connection_id: &str, now: Instant) -> Result<(), RelayError> {
        let mut states = self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let state = states
            .entry(connection_id.to_string())
            .or_insert_with(|| RateLimitState {
                count: 0,
                reset_at: now + self.window,
            });

        if now >= state.reset_at {
            state.count = 0;
            state.reset_at = now + self.window;
        }

        if state.count >= self.max_requests {
            return Err(RelayError::RateLimitExceeded);
        }

        state.count += 1;
        Ok(())
    }

    /// Drop all state for a connection (called on disconnect).
    pub fn forget(&self, connection_id: &str) {
        let mut states = self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        states.remove(connection_id);
    }

    /// Current state for a connection, if it has made any request.
    #[cfg(test)]
    pub fn state(&self, connection_id: &str) -> Option<RateLimitState> {
        let states = self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        states.get(connection_id).copied()
    }

    /// Number of connections with live quota state.
    pub fn tracked_connections(&self) -> usize {
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}
