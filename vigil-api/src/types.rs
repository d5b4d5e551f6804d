use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::TargetError;

/// Result returned by every [`Target`](crate::target::Target) hook.
pub type TargetResult<T> = Result<T, TargetError>;

/// Name of a worker, unique within its pool for the worker's lifetime.
///
/// Pools name their workers `<pool>-<index>`; the orchestrator itself signs the
/// messages it enqueues with [`WorkerId::orchestrator`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Id of the `index`-th worker of pool `pool`.
    pub fn indexed(pool: &str, index: usize) -> Self {
        Self(format!("{pool}-{index}"))
    }

    /// Origin used for messages enqueued from outside any worker.
    pub fn orchestrator() -> Self {
        Self("orchestrator".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for WorkerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for WorkerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
