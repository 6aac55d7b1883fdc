//! Sent/seen/acked counters surfaced by the `/stats` command.

use std::fmt;
use std::sync::Mutex;

#[derive(Default)]
struct Counters {
    sent: u64,
    seen: u64,
    acked: u64,
}

/// Cheap diagnostic counters.
#[derive(Default)]
pub struct Metrics {
    counters: Mutex<Counters>,
}

impl Metrics {
    /// Records one locally originated record.
    pub fn inc_sent(&self) {
        self.counters.lock().expect("metrics lock").sent += 1;
    }

    /// Records one locally accepted inbound record.
    pub fn inc_seen(&self) {
        self.counters.lock().expect("metrics lock").seen += 1;
    }

    /// Records one confirmed acknowledgement.
    pub fn inc_ack(&self) {
        self.counters.lock().expect("metrics lock").acked += 1;
    }

    /// Consistent snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.counters.lock().expect("metrics lock");
        MetricsSnapshot {
            sent: counters.sent,
            seen: counters.seen,
            acked: counters.acked,
        }
    }
}

/// Point-in-time counter values, printed by `/stats`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MetricsSnapshot {
    /// Locally originated records.
    pub sent: u64,
    /// Locally accepted inbound records.
    pub seen: u64,
    /// Confirmed acknowledgements.
    pub acked: u64,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sent={} seen={} acked={}", self.sent, self.seen, self.acked)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
