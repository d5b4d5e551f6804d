use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::error;

/// Fail-fast flag shared by every pool and worker of a run.
///
/// Once set it stays set. Only infrastructure faults (a broken queue) set it from
/// inside the runtime; callers may set it to abort a run.
#[derive(Clone, Default)]
pub struct GlobalExitEvent {
    inner: Arc<ExitInner>,
}

#[derive(Default)]
struct ExitInner {
    triggered: AtomicBool,
    reason: OnceLock<String>,
}

impl GlobalExitEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. The first reason wins; later calls are no-ops.
    pub fn set(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.inner.reason.set(reason.clone()).is_ok() {
            error!(reason = %reason, "global exit event set; stopping every worker");
        }
        self.inner.triggered.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<&str> {
        self.inner.reason.get().map(String::as_str)
    }
}

impl fmt::Debug for GlobalExitEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalExitEvent")
            .field("set", &self.is_set())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reason_wins_and_flag_never_clears() {
        let event = GlobalExitEvent::new();
        assert!(!event.is_set());

        let shared = event.clone();
        shared.set("queue tester closed");
        event.set("second fault");

        assert!(event.is_set());
        assert_eq!(event.reason(), Some("queue tester closed"));
    }
}
