//! # Execution Budget
//!
//! Wall-clock deadline for CI-bounded runs. Workers query it between messages: without
//! feedback they exit, in a feedback cycle they drain. Running out of budget is not a
//! failure: a run that left work behind reports partial, resumable results.

use std::fmt;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::info;

use crate::thread::config::CiConfig;

pub struct ExecutionBudget {
    max_exec: Duration,
    authorized: bool,
    window: RwLock<Option<(Instant, Instant)>>,
}

impl ExecutionBudget {
    /// Budget of `max_exec`, enforced only when `authorized`.
    pub fn new(max_exec: Duration, authorized: bool) -> Self {
        Self {
            max_exec,
            authorized,
            window: RwLock::new(None),
        }
    }

    /// Budget that never runs out.
    pub fn unbounded() -> Self {
        Self::new(Duration::MAX, false)
    }

    pub fn from_minutes(minutes: u64) -> Self {
        Self::new(Duration::from_secs(minutes.saturating_mul(60)), true)
    }

    pub fn from_ci(ci: Option<&CiConfig>) -> Self {
        match ci {
            Some(ci) => Self::from_minutes(ci.max_exec_minutes),
            None => Self::unbounded(),
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized
    }

    pub fn max_exec(&self) -> Duration {
        self.max_exec
    }

    /// Record now as the start of the run; the deadline follows from it.
    pub fn set_start_time(&self) {
        let start = Instant::now();
        let deadline = start.checked_add(self.max_exec).unwrap_or_else(far_future);
        *self.window.write().unwrap_or_else(|e| e.into_inner()) = Some((start, deadline));

        if self.authorized {
            info!(max_exec = ?self.max_exec, "execution budget started");
        }
    }

    pub fn start_time(&self) -> Option<Instant> {
        self.read_window().map(|(start, _)| start)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.read_window().map(|(_, deadline)| deadline)
    }

    /// True once the deadline has passed. Always false when the budget is not
    /// authorized or was never started.
    pub fn is_time_exceeded(&self) -> bool {
        if !self.authorized {
            return false;
        }

        match self.deadline() {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// Time left before the deadline, `None` when no deadline applies.
    pub fn remaining(&self) -> Option<Duration> {
        if !self.authorized {
            return None;
        }
        self.deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    fn read_window(&self) -> Option<(Instant, Instant)> {
        *self.window.read().unwrap_or_else(|e| e.into_inner())
    }
}

// Instant has no MAX; a century out is never reached by a run.
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(100 * 365 * 24 * 60 * 60)
}

impl Default for ExecutionBudget {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl fmt::Debug for ExecutionBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionBudget")
            .field("max_exec", &self.max_exec)
            .field("authorized", &self.authorized)
            .field("started", &self.start_time().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unstarted_budget_is_never_exceeded() {
        let budget = ExecutionBudget::new(Duration::ZERO, true);
        assert!(!budget.is_time_exceeded());
        assert!(budget.deadline().is_none());
    }

    #[test]
    fn unbounded_budget_survives_start() {
        let budget = ExecutionBudget::unbounded();
        budget.set_start_time();
        assert!(!budget.is_time_exceeded());
        assert!(budget.remaining().is_none());
    }

    #[test]
    fn zero_budget_is_exceeded_immediately() {
        let budget = ExecutionBudget::new(Duration::ZERO, true);
        budget.set_start_time();
        assert!(budget.is_time_exceeded());
        assert_eq!(budget.remaining(), Some(Duration::ZERO));
    }
}
