//! Traffic counters for the live session.
//!
//! The tunnel monitor thread increments the counters while status readers take
//! snapshots concurrently. Both counters and the uptime origin live behind one
//! lock so a snapshot never mixes values from two different moments, and an
//! increment can never straddle a reset.

use std::time::Instant;

use parking_lot::Mutex;

use crate::state::Stats;

#[derive(Debug, Default)]
struct Counters {
    sent: u64,
    recv: u64,
    /// Set while a session is live.
    since: Option<Instant>,
    /// Set once teardown starts; uptime stops advancing here.
    until: Option<Instant>,
    /// Final snapshot of a torn-down session, served to the next reader.
    frozen: Option<Stats>,
}

impl Counters {
    fn read(&self, now: Instant) -> Stats {
        Stats {
            bytes_sent: self.sent,
            bytes_recv: self.recv,
            uptime_seconds: self.since.map_or(0, |since| {
                self.until
                    .unwrap_or(now)
                    .saturating_duration_since(since)
                    .as_secs()
            }),
        }
    }
}

/// Thread-safe byte counter with an uptime clock.
#[derive(Debug, Default)]
pub struct StatsCounter {
    inner: Mutex<Counters>,
}

impl StatsCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds bytes sent through the tunnel.
    ///
    /// Returns `false` and drops the increment when no session is live.
    pub fn add_sent(&self, n: u64) -> bool {
        let mut counters = self.inner.lock();
        if counters.since.is_none() {
            return false;
        }
        counters.sent = counters.sent.saturating_add(n);
        true
    }

    /// Adds bytes received through the tunnel.
    ///
    /// Returns `false` and drops the increment when no session is live.
    pub fn add_recv(&self, n: u64) -> bool {
        let mut counters = self.inner.lock();
        if counters.since.is_none() {
            return false;
        }
        counters.recv = counters.recv.saturating_add(n);
        true
    }

    /// Zeroes both counters and stops the uptime clock.
    pub fn reset(&self) {
        *self.inner.lock() = Counters::default();
    }

    /// Zeroes the counters and starts the uptime clock at `at`.
    pub fn begin(&self, at: Instant) {
        *self.inner.lock() = Counters {
            since: Some(at),
            ..Counters::default()
        };
    }

    /// Stops the uptime clock at `at` while the counters keep accepting the
    /// tail of the session's traffic. Ignored when no session is live.
    pub fn halt(&self, at: Instant) {
        let mut counters = self.inner.lock();
        if counters.since.is_some() && counters.until.is_none() {
            counters.until = Some(at);
        }
    }

    /// Ends the session: keeps its final values for one more read, then zeros.
    pub fn freeze(&self) {
        let mut counters = self.inner.lock();
        let last = counters.read(Instant::now());
        *counters = Counters {
            frozen: Some(last),
            ..Counters::default()
        };
    }

    /// Consistent point-in-time copy.
    pub fn snapshot(&self) -> Stats {
        let mut counters = self.inner.lock();
        if let Some(last) = counters.frozen.take() {
            return last;
        }
        counters.read(Instant::now())
    }

    /// True while a session is live.
    pub fn is_running(&self) -> bool {
        self.inner.lock().since.is_some()
    }
}
