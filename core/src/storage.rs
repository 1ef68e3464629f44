//! Rolling counters for the current breaker generation
//!
//! The counters are shared between the breaker and its state machine context so
//! that transition guards can read them, the same way they would read any other
//! storage backend. Every mutation happens while the breaker holds its own lock;
//! the inner lock only exists to make the store shareable.

use parking_lot::RwLock;

/// Snapshot of the request and outcome counters of one generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    /// Calls admitted in this generation
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    /// Fraction of recorded outcomes that were failures (0.0 when nothing recorded)
    pub fn failure_ratio(&self) -> f64 {
        let total = u64::from(self.total_successes) + u64::from(self.total_failures);
        if total == 0 {
            0.0
        } else {
            self.total_failures as f64 / total as f64
        }
    }

    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }
}

/// Thread-safe holder for the counters of the current generation
#[derive(Debug, Default)]
pub struct CountStore {
    counts: RwLock<Counts>,
}

impl CountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.counts.write().on_request();
    }

    pub fn record_success(&self) {
        self.counts.write().on_success();
    }

    pub fn record_failure(&self) {
        self.counts.write().on_failure();
    }

    /// Zero every counter (a new generation starts)
    pub fn clear(&self) {
        *self.counts.write() = Counts::default();
    }

    pub fn snapshot(&self) -> Counts {
        *self.counts.read()
    }
}
