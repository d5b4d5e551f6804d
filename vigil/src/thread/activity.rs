use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Shared view of how busy one feedback group is.
///
/// Every queue of a feedback cycle (the tester and miner inputs) points at the same
/// tracker. A record counts as outstanding from the moment it is pushed until the
/// worker that consumed it has forwarded its outputs, so the count only reaches zero
/// when nothing is queued or in flight anywhere in the cycle.
pub struct ActivityTracker {
    outstanding: AtomicUsize,
    origin: Instant,
    last_activity_nanos: AtomicU64,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            outstanding: AtomicUsize::new(0),
            origin: Instant::now(),
            last_activity_nanos: AtomicU64::new(0),
        }
    }

    /// A record entered one of the tracked queues.
    pub fn record_enqueued(&self) {
        self.touch();
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    /// A record left the cycle: processed, skipped or rerouted.
    pub fn record_done(&self) {
        self.touch();
        let _ = self
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Mark productive activity without changing the outstanding count.
    pub fn touch(&self) {
        let nanos = u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.last_activity_nanos.fetch_max(nanos, Ordering::SeqCst);
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Time since the last productive event.
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_nanos(self.last_activity_nanos.load(Ordering::SeqCst));
        self.origin.elapsed().saturating_sub(last)
    }

    /// Nothing queued or in flight, and nothing happened for `idle_window`.
    pub fn is_quiescent(&self, idle_window: Duration) -> bool {
        self.outstanding() == 0 && self.idle_for() >= idle_window
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ActivityTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityTracker")
            .field("outstanding", &self.outstanding())
            .field("idle_for", &self.idle_for())
            .finish()
    }
}
