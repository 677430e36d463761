//! Sliding-window attempt limiting.
//!
//! Injected as a trait so tests can swap in a permissive or scripted
//! implementation; only the poll cooldown lives in the database, since
//! that one must hold across instances.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A sliding-window rate limiter keyed by caller-chosen strings.
pub trait AttemptLimiter: Send + Sync {
    /// Record an attempt for `key` and report whether it is allowed.
    ///
    /// At most `max_attempts` attempts are allowed per `window`; refused
    /// attempts are not recorded, so the window clears as the allowed
    /// ones age out.
    fn allow(&self, key: &str, max_attempts: usize, window: Duration) -> bool;
}

/// In-process limiter over a pruned timestamp map.
#[derive(Debug, Default)]
pub struct InMemoryAttemptLimiter {
    hits: Mutex<HashMap<String, Vec<Instant>>>,
}

impl InMemoryAttemptLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttemptLimiter for InMemoryAttemptLimiter {
    fn allow(&self, key: &str, max_attempts: usize, window: Duration) -> bool {
        let now = Instant::now();
        let mut hits = self
            .hits
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let attempts = hits.entry(key.to_owned()).or_default();
        attempts.retain(|at| now.duration_since(*at) < window);

        if attempts.len() >= max_attempts {
            return false;
        }
        attempts.push(now);
        true
    }
}
