//! Process-wide clock abstraction.
//!
//! The control loop, `Limits`, and in-flight expiry all read "now" through
//! this trait instead of calling `Utc::now()` directly, so rate-limit
//! windows and staleness checks are deterministic in tests (design note,
//! ).

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Real wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually advanced clock for deterministic tests.
#[derive(Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward. Panics on negative durations.
    pub fn advance(&self, delta: chrono::Duration) {
        assert!(delta >= chrono::Duration::zero(), "ManualClock cannot go backward");
        let mut guard = self.inner.lock();
        *guard += delta;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.inner.lock() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_monotonically() {
        let clock = ManualClock::new(Utc::now());
        let t0 = clock.now();
        clock.advance(chrono::Duration::seconds(30));
        let t1 = clock.now();
        assert!(t1 > t0);
        assert_eq!((t1 - t0).num_seconds(), 30);
    }
}
