//! # Targets
//!
//! A [`Target`] is the per-record processing function a worker runs: the syntax
//! check, the DNS or HTTP lookup, the result writer, the subject miner. Workers never
//! know what a target does; they only move its input and output between queues.
//!
//! Each worker gets its own target instance from a [`TargetFactory`], so a target may
//! keep persistent resources (a database handle, an HTTP client) across calls.

use crate::types::{TargetResult, WorkerId};

/// What a single [`Target::process`] call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Yield<O> {
    /// Nothing to forward.
    Nothing,
    /// One record for every output queue.
    One(O),
    /// Several records, each forwarded to every output queue.
    Many(Vec<O>),
}

impl<O> Yield<O> {
    pub fn is_empty(&self) -> bool {
        match self {
            Yield::Nothing => true,
            Yield::One(_) => false,
            Yield::Many(items) => items.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Yield::Nothing => 0,
            Yield::One(_) => 1,
            Yield::Many(items) => items.len(),
        }
    }

    pub fn into_vec(self) -> Vec<O> {
        match self {
            Yield::Nothing => Vec::new(),
            Yield::One(item) => vec![item],
            Yield::Many(items) => items,
        }
    }
}

impl<O> From<Option<O>> for Yield<O> {
    fn from(value: Option<O>) -> Self {
        match value {
            Some(item) => Yield::One(item),
            None => Yield::Nothing,
        }
    }
}

impl<O> From<Vec<O>> for Yield<O> {
    fn from(value: Vec<O>) -> Self {
        Yield::Many(value)
    }
}

/// Pluggable processing step run by every worker of a pool.
///
/// `process` runs synchronously on the worker's own thread and may block; a worker
/// never runs two calls concurrently.
pub trait Target<I, O>: Send {
    /// Called once on the worker thread before the first record.
    fn setup(&mut self) -> TargetResult<()> {
        Ok(())
    }

    /// Process one record.
    fn process(&mut self, input: I) -> TargetResult<Yield<O>>;

    /// Called once on the worker thread after the loop exited, whatever the reason.
    fn teardown(&mut self) {}
}

impl<I, O, F> Target<I, O> for F
where
    F: FnMut(I) -> TargetResult<Yield<O>> + Send,
{
    fn process(&mut self, input: I) -> TargetResult<Yield<O>> {
        self(input)
    }
}

/// Creates one target per worker.
pub trait TargetFactory<I, O>: Send + Sync {
    fn create(&self, worker: &WorkerId) -> Box<dyn Target<I, O>>;
}

impl<I, O, F> TargetFactory<I, O> for F
where
    F: Fn(&WorkerId) -> Box<dyn Target<I, O>> + Send + Sync,
{
    fn create(&self, worker: &WorkerId) -> Box<dyn Target<I, O>> {
        self(worker)
    }
}
