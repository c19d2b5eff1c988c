//! Time sources and periodic cadence.
//!
//! Periodic sources are anchored at kernel time zero and fire at every
//! multiple of their period. When the dispatcher falls behind, the periods
//! that passed without a poll are reported as [`Tick::missed`] on a single
//! activation instead of being replayed one by one; the next deadline is
//! always the next multiple of the period, so lateness never shifts the
//! cadence.

use core::time::Duration;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::event::{SourceId, Tick};

/// Monotonic time relative to kernel start.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Clock advanced by hand. Used by tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) -> Duration {
        let by = by.as_nanos() as u64;
        let now = self.nanos.fetch_add(by, Ordering::AcqRel) + by;
        Duration::from_nanos(now)
    }

    pub fn set(&self, now: Duration) {
        self.nanos.store(now.as_nanos() as u64, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Acquire))
    }
}

#[derive(Debug)]
pub(crate) struct Periodic {
    source: SourceId,
    period: Duration,
    next_due: Duration,
    fired: u64,
}

impl Periodic {
    /// `period` must be non-zero; the builder rejects zero periods.
    pub(crate) fn new(source: SourceId, period: Duration) -> Self {
        Self {
            source,
            period,
            next_due: period,
            fired: 0,
        }
    }

    /// Re-anchors the cadence at kernel time zero. The tick count carries on.
    pub(crate) fn rewind(&mut self) {
        self.next_due = self.period;
    }

    /// Returns at most one tick for every deadline at or before `now`.
    pub(crate) fn poll(&mut self, now: Duration) -> Option<Tick> {
        if now < self.next_due {
            return None;
        }

        let period = self.period.as_nanos();
        let late = (now - self.next_due).as_nanos();
        let skipped = late / period;
        let due = self.next_due.as_nanos() + skipped * period;

        self.next_due = Duration::from_nanos((due + period) as u64);
        self.fired += 1;

        Some(Tick {
            source: self.source,
            seq: self.fired,
            missed: u32::try_from(skipped).unwrap_or(u32::MAX),
            due: Duration::from_nanos(due as u64),
        })
    }
}
