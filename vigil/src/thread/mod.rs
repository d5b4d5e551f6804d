#![doc = " Thread-based worker pools and the testing pipeline built on them."]

pub mod activity;
pub mod budget;
pub mod config;
pub mod error;
pub mod exit;
pub mod mailbox;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod worker;

// Re-export key types for easier usage
pub use activity::ActivityTracker;
pub use budget::ExecutionBudget;
pub use config::{default_max_workers, CiConfig, PipelineConfig, WorkerTimings};
pub use error::{PipelineError, PoolError, QueueError};
pub use exit::GlobalExitEvent;
pub use mailbox::{mailbox, MailboxDirectory};
pub use pipeline::{Pipeline, PipelineBuilder, RunReport, RunStatus};
pub use pool::{PoolStats, WorkerPool, WorkerPoolBuilder};
pub use queue::WorkQueue;
pub use worker::{Worker, WorkerContext, WorkerHandle, WorkerShared, WorkerState};
