//! # Testing Pipeline
//!
//! Wires three pools into one run:
//!
//! ```text
//!             +-----------------------------+
//!             v                             |
//! subjects -> tester --(results)--> miner --+
//!               |
//!               +----(results)--> producer
//! ```
//!
//! The tester/miner pair forms the only cycle. Both of their input queues share one
//! [`ActivityTracker`], so the cycle is known to be empty only when no record is
//! queued or in flight on either side.
//!
//! ## Shutdown Order
//! 1. Stop the tester pool (a cooperative drain when mining is on)
//! 2. Wait the miner: once it is gone nothing new can reach the tester
//! 3. Wait the tester: once it is gone nothing new can reach the producer
//! 4. Stop and wait the producer
//!
//! ## Usage Example
//!
//! ```rust
//! use vigil::thread::config::PipelineConfig;
//! use vigil::thread::pipeline::{Pipeline, RunStatus};
//! use vigil_api::{Target, TargetResult, WorkerId, Yield};
//!
//! fn tester(_: &WorkerId) -> Box<dyn Target<String, String>> {
//!     Box::new(|subject: String| -> TargetResult<Yield<String>> {
//!         Ok(Yield::One(format!("{subject} ACTIVE")))
//!     })
//! }
//!
//! fn producer(_: &WorkerId) -> Box<dyn Target<String, ()>> {
//!     Box::new(|_line: String| -> TargetResult<Yield<()>> { Ok(Yield::Nothing) })
//! }
//!
//! let config = PipelineConfig { max_workers: Some(2), mining: false, ..Default::default() };
//! let pipeline = Pipeline::builder(config)
//!     .tester(tester)
//!     .producer(producer)
//!     .build()
//!     .unwrap();
//!
//! let report = pipeline.run(vec!["example.org".to_string()]).unwrap();
//! assert_eq!(report.status, RunStatus::Completed);
//! assert_eq!(report.tester.processed, 1);
//! ```

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use vigil_api::TargetFactory;

use crate::run_span;
use crate::thread::activity::ActivityTracker;
use crate::thread::budget::ExecutionBudget;
use crate::thread::config::PipelineConfig;
use crate::thread::error::{PipelineError, PoolError};
use crate::thread::exit::GlobalExitEvent;
use crate::thread::mailbox::MailboxDirectory;
use crate::thread::pool::{PoolStats, WorkerPool};
use crate::thread::queue::WorkQueue;

pub const TESTER_POOL: &str = "tester";
pub const MINER_POOL: &str = "miner";
pub const PRODUCER_POOL: &str = "producer";

/// How a run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every subject and every mined subject was tested
    Completed,
    /// The execution budget ran out with work left; results are partial and the run
    /// can resume
    Partial,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => f.write_str("completed"),
            RunStatus::Partial => f.write_str("partial"),
        }
    }
}

/// Summary of one pipeline run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub elapsed: Duration,
    pub tester: PoolStats,
    pub miner: Option<PoolStats>,
    pub producer: PoolStats,
}

impl RunReport {
    pub fn is_partial(&self) -> bool {
        self.status == RunStatus::Partial
    }
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder<S, R> {
    config: PipelineConfig,
    tester: Option<Arc<dyn TargetFactory<S, R>>>,
    miner: Option<Arc<dyn TargetFactory<R, S>>>,
    producer: Option<Arc<dyn TargetFactory<R, ()>>>,
    exit_event: GlobalExitEvent,
}

impl<S, R> PipelineBuilder<S, R>
where
    S: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    /// Factory of the targets that test subjects.
    pub fn tester<F>(mut self, factory: F) -> Self
    where
        F: TargetFactory<S, R> + 'static,
    {
        self.tester = Some(Arc::new(factory));
        self
    }

    /// Factory of the targets that mine test results for new subjects.
    pub fn miner<F>(mut self, factory: F) -> Self
    where
        F: TargetFactory<R, S> + 'static,
    {
        self.miner = Some(Arc::new(factory));
        self
    }

    /// Factory of the targets that consume test results (writers, formatters).
    pub fn producer<F>(mut self, factory: F) -> Self
    where
        F: TargetFactory<R, ()> + 'static,
    {
        self.producer = Some(Arc::new(factory));
        self
    }

    /// Use a caller-owned exit event, e.g. to abort the run from a signal handler.
    pub fn exit_event(mut self, exit_event: GlobalExitEvent) -> Self {
        self.exit_event = exit_event;
        self
    }

    pub fn build(self) -> Result<Pipeline<S, R>, PipelineError> {
        let tester = self
            .tester
            .ok_or_else(|| PipelineError::Configuration("no tester factory".to_string()))?;
        let producer = self
            .producer
            .ok_or_else(|| PipelineError::Configuration("no producer factory".to_string()))?;

        if self.config.effective_max_workers() < 1 {
            return Err(PipelineError::Configuration(
                "max_workers must be at least 1".to_string(),
            ));
        }

        let miner = if self.config.mining { self.miner } else { None };

        Ok(Pipeline {
            config: self.config,
            tester,
            miner,
            producer,
            exit_event: self.exit_event,
        })
    }
}

/// Orchestrates the tester, miner and producer pools of one run.
pub struct Pipeline<S, R> {
    config: PipelineConfig,
    tester: Arc<dyn TargetFactory<S, R>>,
    miner: Option<Arc<dyn TargetFactory<R, S>>>,
    producer: Arc<dyn TargetFactory<R, ()>>,
    exit_event: GlobalExitEvent,
}

impl<S, R> Clone for Pipeline<S, R> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            tester: Arc::clone(&self.tester),
            miner: self.miner.clone(),
            producer: Arc::clone(&self.producer),
            exit_event: self.exit_event.clone(),
        }
    }
}

impl<S, R> fmt::Debug for Pipeline<S, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("mining", &self.miner.is_some())
            .field("exit_event", &self.exit_event)
            .finish()
    }
}

struct Pools<S, R> {
    tester: WorkerPool<S, R>,
    miner: Option<WorkerPool<R, S>>,
    producer: WorkerPool<R, ()>,
}

impl<S, R> Pools<S, R>
where
    S: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    fn terminate_all(&mut self) {
        self.tester.terminate();
        if let Some(miner) = self.miner.as_mut() {
            miner.terminate();
        }
        self.producer.terminate();
    }

    // Joins everything after a failed start; errors were already reported.
    fn abort(&mut self) {
        self.terminate_all();
        let _ = self.tester.wait();
        if let Some(miner) = self.miner.as_mut() {
            let _ = miner.wait();
        }
        let _ = self.producer.wait();
    }

    // Records still queued on the tester/miner cycle once every pool has exited.
    fn untested(&self) -> usize {
        self.tester.input_queue().tracker().outstanding()
    }

    fn skipped(&self) -> u64 {
        self.tester.stats().skipped
            + self.miner.as_ref().map_or(0, |miner| miner.stats().skipped)
            + self.producer.stats().skipped
    }
}

impl<S, R> Pipeline<S, R>
where
    S: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    pub fn builder(config: PipelineConfig) -> PipelineBuilder<S, R> {
        PipelineBuilder {
            config,
            tester: None,
            miner: None,
            producer: None,
            exit_event: GlobalExitEvent::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_mining(&self) -> bool {
        self.miner.is_some()
    }

    pub fn exit_event(&self) -> &GlobalExitEvent {
        &self.exit_event
    }

    /// Test every subject, mining results for new subjects when enabled, and drain
    /// the pools in order. Blocks until the run is over.
    pub fn run<It>(&self, subjects: It) -> Result<RunReport, PipelineError>
    where
        It: IntoIterator<Item = S>,
    {
        let run_id = Uuid::new_v4();
        let span = run_span!(run_id, mining = self.is_mining());
        let _guard = span.enter();
        let started = Instant::now();

        let budget = Arc::new(ExecutionBudget::from_ci(self.config.ci.as_ref()));
        budget.set_start_time();

        let mut pools = self.build_pools(&budget)?;

        if let Err(error) = self.start_and_seed(&mut pools, subjects) {
            pools.abort();
            return Err(error.into());
        }

        let outcome = self.drain(&mut pools);

        if self.exit_event.is_set() {
            let reason = self.exit_event.reason().unwrap_or("exit event set");
            return Err(PipelineError::Aborted(reason.to_string()));
        }
        outcome?;

        // A deadline that passes during the final drain leaves nothing behind.
        let status = if pools.skipped() > 0 || pools.untested() > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Completed
        };

        let report = RunReport {
            run_id,
            status,
            elapsed: started.elapsed(),
            tester: pools.tester.stats(),
            miner: pools.miner.as_ref().map(WorkerPool::stats),
            producer: pools.producer.stats(),
        };
        info!(
            %status,
            elapsed = ?report.elapsed,
            tested = report.tester.processed,
            "run finished"
        );
        Ok(report)
    }

    /// Async form of [`Pipeline::run`]; the run happens on a blocking task.
    pub async fn run_async(&self, subjects: Vec<S>) -> Result<RunReport, PipelineError> {
        let pipeline = self.clone();
        tokio::task::spawn_blocking(move || pipeline.run(subjects))
            .await
            .map_err(|e| PipelineError::Join(e.to_string()))?
    }

    fn build_pools(&self, budget: &Arc<ExecutionBudget>) -> Result<Pools<S, R>, PipelineError> {
        let max_workers = self.config.effective_max_workers();
        let timings = self.config.timings;
        let directory = Arc::new(MailboxDirectory::new());
        let mining = self.miner.is_some();

        let cycle = Arc::new(ActivityTracker::new());
        let tester_input = Arc::new(WorkQueue::with_tracker(
            format!("{TESTER_POOL}-input"),
            Arc::clone(&cycle),
        ));
        let miner_input = Arc::new(WorkQueue::with_tracker(
            format!("{MINER_POOL}-input"),
            Arc::clone(&cycle),
        ));
        let producer_input = WorkQueue::shared(format!("{PRODUCER_POOL}-input"));

        let mut tester = WorkerPool::builder(TESTER_POOL)
            .max_workers(max_workers)
            .target_factory(Arc::clone(&self.tester))
            .input_queue(Arc::clone(&tester_input))
            .output_queue(Arc::clone(&producer_input))
            .daemon(self.config.daemon)
            .budget(Arc::clone(budget))
            .exit_event(self.exit_event.clone())
            .directory(Arc::clone(&directory))
            .timings(timings)
            .feedback(mining);
        if mining {
            tester = tester.output_queue(Arc::clone(&miner_input)).peer(MINER_POOL);
        }
        let tester = tester.build()?;

        let miner = match &self.miner {
            Some(factory) => Some(
                WorkerPool::builder(MINER_POOL)
                    .max_workers(max_workers)
                    .target_factory(Arc::clone(factory))
                    .input_queue(miner_input)
                    .output_queue(tester_input)
                    .daemon(self.config.daemon)
                    .budget(Arc::clone(budget))
                    .exit_event(self.exit_event.clone())
                    .directory(Arc::clone(&directory))
                    .timings(timings)
                    .feedback(true)
                    .peer(TESTER_POOL)
                    .build()?,
            ),
            None => None,
        };

        // The producer only drains what the tester emitted: no budget, no feedback.
        let producer = WorkerPool::builder(PRODUCER_POOL)
            .max_workers(max_workers)
            .target_factory(Arc::clone(&self.producer))
            .input_queue(producer_input)
            .daemon(self.config.daemon)
            .exit_event(self.exit_event.clone())
            .directory(directory)
            .timings(timings)
            .build()?;

        Ok(Pools {
            tester,
            miner,
            producer,
        })
    }

    fn start_and_seed<It>(&self, pools: &mut Pools<S, R>, subjects: It) -> Result<(), PoolError>
    where
        It: IntoIterator<Item = S>,
    {
        pools.producer.start()?;
        if let Some(miner) = pools.miner.as_mut() {
            miner.start()?;
        }
        pools.tester.start()?;

        let seeded = pools.tester.add_all_to_input_queue(subjects)?;
        info!(seeded, "subjects queued");
        Ok(())
    }

    fn drain(&self, pools: &mut Pools<S, R>) -> Result<(), PipelineError> {
        let poll_interval = self.config.timings.poll_interval;

        if let Err(error) = pools.tester.send_stop_signal(None) {
            pools.terminate_all();
            return Err(error.into());
        }

        let mut first_error: Option<PoolError> = None;

        if let Some(miner) = pools.miner.as_mut() {
            while !miner.is_finished() {
                if pools.tester.is_finished() || self.exit_event.is_set() {
                    // Nothing left to hold the miner for.
                    miner.terminate();
                    break;
                }
                thread::sleep(poll_interval);
            }
            if let Err(error) = miner.wait() {
                warn!(%error, "miner pool failed; terminating tester");
                pools.tester.terminate();
                first_error.get_or_insert(error);
            }
        }

        if let Err(error) = pools.tester.wait() {
            first_error.get_or_insert(error);
        }

        if self.exit_event.is_set() {
            pools.producer.terminate();
        } else if let Err(error) = pools.producer.send_stop_signal(None) {
            pools.producer.terminate();
            first_error.get_or_insert(error);
        }
        if let Err(error) = pools.producer.wait() {
            first_error.get_or_insert(error);
        }

        match first_error {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }
}
