use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_WAIT_BACKOFF: Duration = Duration::from_secs(2);
pub const DEFAULT_IDLE_WINDOW: Duration = Duration::from_secs(10);

/// Default worker count: every CPU but two, never less than one.
pub fn default_max_workers() -> usize {
    num_cpus::get().saturating_sub(2).max(1)
}

// --- Worker Timings ---

/// Timing knobs of the worker control loop.
///
/// The backoff and idle window were tuned empirically and are kept configurable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerTimings {
    /// Longest a worker blocks on its queues before re-checking exit flags and budget.
    pub poll_interval: Duration,

    /// Delay before a held `wait` token is re-sent to the worker itself.
    pub wait_backoff: Duration,

    /// How long the whole feedback cycle must stay unproductive before draining ends.
    pub idle_window: Duration,
}

impl Default for WorkerTimings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            wait_backoff: DEFAULT_WAIT_BACKOFF,
            idle_window: DEFAULT_IDLE_WINDOW,
        }
    }
}

// --- Pipeline Configuration ---

/// Continuous-integration settings: when present, the run gets a wall-clock budget.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiConfig {
    /// Minutes the run may take before draining starts.
    pub max_exec_minutes: u64,
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            max_exec_minutes: 15,
        }
    }
}

/// Configuration for a [`Pipeline`](crate::thread::pipeline::Pipeline).
///
/// Built once by the caller and passed by reference to every pool; workers receive
/// the parts they need by value at construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Workers per pool. `None` picks [`default_max_workers`].
    pub max_workers: Option<usize>,

    /// Whether tester results are mined for new subjects.
    pub mining: bool,

    /// Control loop timings shared by every pool.
    pub timings: WorkerTimings,

    /// Execution budget for CI runs; `None` for interactive runs.
    pub ci: Option<CiConfig>,

    /// Tie worker threads to their pool: dropping the pool terminates them.
    pub daemon: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            mining: true,
            timings: WorkerTimings::default(),
            ci: None,
            daemon: true,
        }
    }
}

impl PipelineConfig {
    pub fn effective_max_workers(&self) -> usize {
        self.max_workers.unwrap_or_else(default_max_workers)
    }

    /// Capture the configuration as an immutable JSON snapshot.
    pub fn snapshot(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Rebuild a configuration from a snapshot taken with [`PipelineConfig::snapshot`].
    pub fn from_snapshot(snapshot: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(snapshot)
    }
}
