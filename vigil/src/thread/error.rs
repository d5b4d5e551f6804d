use thiserror::Error;

use vigil_api::{TargetError, WorkerId};

/// Errors related to shared queue operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue {0} is closed")]
    Closed(String),
    #[error("Queue {0} is disconnected")]
    Disconnected(String),
}

/// Errors surfaced by a [`WorkerPool`](crate::thread::pool::WorkerPool).
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Pool {0} is already started")]
    AlreadyStarted(String),
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(String),
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("Unknown worker: {0}")]
    UnknownWorker(WorkerId),
    #[error("Timed out waiting for pool {0}")]
    WaitTimeout(String),
    #[error("Failed to join worker threads: {0}")]
    Join(String),
    #[error("Worker {worker} failed: {error}")]
    Target {
        worker: WorkerId,
        #[source]
        error: TargetError,
        trace: String,
    },
}

impl PoolError {
    /// The target error carried by this pool error, if any.
    pub fn target_error(&self) -> Option<&TargetError> {
        match self {
            PoolError::Target { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Errors surfaced by a [`Pipeline`](crate::thread::pipeline::Pipeline) run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("Pipeline aborted: {0}")]
    Aborted(String),
    #[error("Failed to join pipeline task: {0}")]
    Join(String),
}
