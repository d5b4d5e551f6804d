//! # Worker Pool
//!
//! A fixed-size set of homogeneous workers sharing one input queue and one fan-out set
//! of output queues. The shared input queue balances load across the workers without
//! a central scheduler; control tokens are balanced along with records, which is why
//! addressed signals go through the [`MailboxDirectory`] instead.
//!
//! ## Lifecycle
//! `build -> create -> start -> send_stop_signal -> wait -> drop`
//!
//! ## Usage Example
//!
//! ```rust
//! use vigil::thread::pool::WorkerPool;
//! use vigil_api::{Target, TargetResult, WorkerId, Yield};
//!
//! fn doubler(_: &WorkerId) -> Box<dyn Target<u64, u64>> {
//!     Box::new(|x: u64| -> TargetResult<Yield<u64>> { Ok(Yield::One(x * 2)) })
//! }
//!
//! let mut pool = WorkerPool::builder("doubler")
//!     .max_workers(3)
//!     .target(doubler)
//!     .build()
//!     .unwrap();
//!
//! pool.start().unwrap();
//! pool.add_all_to_input_queue(1..=10).unwrap();
//! pool.send_stop_signal(None).unwrap();
//! pool.wait().unwrap();
//! assert_eq!(pool.stats().processed, 10);
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use vigil_api::{ControlMessage, Message, Payload, Signal, TargetFactory, WorkerId};

use crate::log_pool;
use crate::thread::budget::ExecutionBudget;
use crate::thread::config::{default_max_workers, WorkerTimings};
use crate::thread::error::PoolError;
use crate::thread::exit::GlobalExitEvent;
use crate::thread::mailbox::{mailbox, MailboxDirectory};
use crate::thread::queue::WorkQueue;
use crate::thread::worker::{Worker, WorkerContext, WorkerHandle, WorkerShared, WorkerState};

/// Snapshot of a pool's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Pool name
    pub name: String,

    /// Configured worker count
    pub max_workers: usize,

    /// Workers started and not yet exited
    pub running: usize,

    /// Records handed to the target, across every worker the pool ever had
    pub processed: u64,

    /// Records forwarded to the output queues
    pub emitted: u64,

    /// Records released unprocessed while draining
    pub skipped: u64,

    /// Messages currently waiting on the input queue
    pub queue_len: usize,
}

/// Builder for [`WorkerPool`].
pub struct WorkerPoolBuilder<I, O> {
    name: String,
    max_workers: usize,
    factory: Option<Arc<dyn TargetFactory<I, O>>>,
    input_queue: Option<Arc<WorkQueue<I>>>,
    output_queues: Vec<Arc<WorkQueue<O>>>,
    generate_input_queue: bool,
    generate_output_queue: bool,
    daemon: bool,
    budget: Option<Arc<ExecutionBudget>>,
    exit_event: Option<GlobalExitEvent>,
    feedback: bool,
    peers: Vec<String>,
    directory: Option<Arc<MailboxDirectory>>,
    timings: WorkerTimings,
}

impl<I, O> WorkerPoolBuilder<I, O>
where
    I: Send + 'static,
    O: Clone + Send + 'static,
{
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_workers: default_max_workers(),
            factory: None,
            input_queue: None,
            output_queues: Vec::new(),
            generate_input_queue: true,
            generate_output_queue: false,
            daemon: true,
            budget: None,
            exit_event: None,
            feedback: false,
            peers: Vec::new(),
            directory: None,
            timings: WorkerTimings::default(),
        }
    }

    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Factory building one target per worker.
    pub fn target<F>(mut self, factory: F) -> Self
    where
        F: TargetFactory<I, O> + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    pub fn target_factory(mut self, factory: Arc<dyn TargetFactory<I, O>>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Use an externally owned input queue.
    pub fn input_queue(mut self, queue: Arc<WorkQueue<I>>) -> Self {
        self.input_queue = Some(queue);
        self
    }

    /// Add an output queue. May be called repeatedly; every output is broadcast to all.
    pub fn output_queue(mut self, queue: Arc<WorkQueue<O>>) -> Self {
        self.output_queues.push(queue);
        self
    }

    /// Create an input queue when none was supplied. On by default.
    pub fn generate_input_queue(mut self, generate: bool) -> Self {
        self.generate_input_queue = generate;
        self
    }

    /// Create an output queue when none was supplied. Off by default.
    pub fn generate_output_queue(mut self, generate: bool) -> Self {
        self.generate_output_queue = generate;
        self
    }

    pub fn daemon(mut self, daemon: bool) -> Self {
        self.daemon = daemon;
        self
    }

    pub fn budget(mut self, budget: Arc<ExecutionBudget>) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn exit_event(mut self, exit_event: GlobalExitEvent) -> Self {
        self.exit_event = Some(exit_event);
        self
    }

    /// Take part in a feedback cycle: `stop` turns into a cooperative drain.
    pub fn feedback(mut self, feedback: bool) -> Self {
        self.feedback = feedback;
        self
    }

    /// Pool notified with `wait` tokens during a cooperative drain.
    pub fn peer(mut self, pool: impl Into<String>) -> Self {
        self.peers.push(pool.into());
        self
    }

    pub fn peers<It, S>(mut self, pools: It) -> Self
    where
        It: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.peers.extend(pools.into_iter().map(Into::into));
        self
    }

    /// Directory shared with the other pools of a pipeline.
    pub fn directory(mut self, directory: Arc<MailboxDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn timings(mut self, timings: WorkerTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn build(self) -> Result<WorkerPool<I, O>, PoolError> {
        let factory = self.factory.ok_or_else(|| {
            PoolError::Configuration(format!("pool {} has no target factory", self.name))
        })?;

        if self.max_workers < 1 {
            return Err(PoolError::Configuration(format!(
                "pool {} needs at least one worker",
                self.name
            )));
        }

        let input = match self.input_queue {
            Some(queue) => queue,
            None if self.generate_input_queue => WorkQueue::shared(format!("{}-input", self.name)),
            None => {
                return Err(PoolError::Configuration(format!(
                    "pool {} has no input queue and may not generate one",
                    self.name
                )))
            }
        };

        let mut outputs = self.output_queues;
        if outputs.is_empty() && self.generate_output_queue {
            outputs.push(WorkQueue::shared(format!("{}-output", self.name)));
        }

        let ctx = WorkerContext {
            exit_event: self.exit_event.unwrap_or_default(),
            budget: self.budget,
            directory: self
                .directory
                .unwrap_or_else(|| Arc::new(MailboxDirectory::new())),
            timings: self.timings,
            feedback: self.feedback,
            peers: self.peers,
        };

        log_pool!(self.name.as_str(), "built", max_workers = self.max_workers);

        Ok(WorkerPool {
            name: self.name,
            max_workers: self.max_workers,
            factory,
            input,
            outputs,
            daemon: self.daemon,
            ctx,
            created: Vec::new(),
            running: Vec::new(),
            history: Vec::new(),
            started: false,
        })
    }
}

/// A pool of workers running the same target.
pub struct WorkerPool<I, O> {
    name: String,
    max_workers: usize,
    factory: Arc<dyn TargetFactory<I, O>>,
    input: Arc<WorkQueue<I>>,
    outputs: Vec<Arc<WorkQueue<O>>>,
    daemon: bool,
    ctx: WorkerContext,
    created: Vec<Worker<I, O>>,
    running: Vec<WorkerHandle>,
    // Every worker the pool ever created; feeds stats and exception delivery.
    history: Vec<Arc<WorkerShared>>,
    started: bool,
}

impl<I, O> WorkerPool<I, O> {
    pub fn is_daemon(&self) -> bool {
        self.daemon
    }
}

impl<I, O> WorkerPool<I, O>
where
    I: Send + 'static,
    O: Clone + Send + 'static,
{
    pub fn builder(name: impl Into<String>) -> WorkerPoolBuilder<I, O> {
        WorkerPoolBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }


    pub fn input_queue(&self) -> &Arc<WorkQueue<I>> {
        &self.input
    }

    pub fn output_queues(&self) -> &[Arc<WorkQueue<O>>] {
        &self.outputs
    }

    pub fn exit_event(&self) -> &GlobalExitEvent {
        &self.ctx.exit_event
    }

    pub fn directory(&self) -> &Arc<MailboxDirectory> {
        &self.ctx.directory
    }

    /// Ids of the started workers, in start order.
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.running.iter().map(|handle| handle.id().clone()).collect()
    }

    pub fn worker_state(&self, worker: &WorkerId) -> Option<WorkerState> {
        self.history
            .iter()
            .find(|shared| shared.id() == worker)
            .map(|shared| shared.state())
    }

    /// Instantiate `count` workers (default `max_workers`) wired to the pool's queues
    /// and flags. Workers are not started.
    pub fn create(&mut self, count: Option<usize>) -> Result<(), PoolError> {
        if self.started {
            return Err(PoolError::AlreadyStarted(self.name.clone()));
        }

        let count = count.unwrap_or(self.max_workers);
        if count < 1 || count > self.max_workers {
            return Err(PoolError::Configuration(format!(
                "pool {} cannot create {count} workers (max {})",
                self.name, self.max_workers
            )));
        }

        for stale in self.created.drain(..) {
            self.ctx.directory.unregister(stale.id());
        }

        let first = self.history.len();
        for index in first..first + count {
            let id = WorkerId::indexed(&self.name, index);
            let (sender, receiver) = mailbox();
            self.ctx.directory.register(&self.name, id.clone(), sender.clone());

            let worker = Worker::new(
                id.clone(),
                self.name.clone(),
                Arc::clone(&self.input),
                self.outputs.clone(),
                self.factory.create(&id),
                (sender, receiver),
                self.ctx.clone(),
            );
            self.history.push(Arc::clone(worker.shared()));
            self.created.push(worker);
        }

        log_pool!(self.name.as_str(), "created", count);
        Ok(())
    }

    /// Start every created worker, creating them first if needed. Starting a started
    /// pool is a no-op.
    pub fn start(&mut self) -> Result<(), PoolError> {
        if self.started {
            debug!(pool = %self.name, "pool already started");
            return Ok(());
        }
        if self.created.is_empty() {
            self.create(None)?;
        }
        if let Some(budget) = &self.ctx.budget {
            if budget.start_time().is_none() {
                budget.set_start_time();
            }
        }

        for worker in self.created.drain(..) {
            match worker.spawn() {
                Ok(handle) => self.running.push(handle),
                Err(error) => {
                    warn!(pool = %self.name, %error, "spawn failed; terminating started workers");
                    for handle in &self.running {
                        handle.terminate();
                    }
                    for handle in &mut self.running {
                        handle.join();
                    }
                    return Err(error);
                }
            }
        }

        self.started = true;
        info!(pool = %self.name, workers = self.running.len(), "pool started");
        Ok(())
    }

    /// Send `stop` to one worker's mailbox, or one `stop` per worker on the shared
    /// input queue when `worker` is `None`.
    pub fn send_stop_signal(&self, worker: Option<&WorkerId>) -> Result<(), PoolError> {
        match worker {
            Some(id) => {
                let known = self.history.iter().any(|shared| shared.id() == id);
                if !known
                    || !self
                        .ctx
                        .directory
                        .deliver(id, ControlMessage::stop(WorkerId::orchestrator()))
                {
                    return Err(PoolError::UnknownWorker(id.clone()));
                }
                log_pool!(self.name.as_str(), "stop delivered", worker = %id);
            }
            None => {
                let targets = if self.started {
                    self.running.len()
                } else {
                    self.created.len()
                };
                for _ in 0..targets {
                    self.input
                        .push_signal(WorkerId::orchestrator(), Signal::Stop, None)?;
                }
                log_pool!(self.name.as_str(), "stop queued", tokens = targets);
            }
        }
        Ok(())
    }

    /// Block until every started worker exited, then surface the first captured
    /// exception.
    pub fn wait(&mut self) -> Result<(), PoolError> {
        for handle in &mut self.running {
            handle.join();
        }
        self.finish_wait()
    }

    /// Async form of [`WorkerPool::wait`]. Worker threads are polled every poll
    /// interval and joined once all of them returned.
    ///
    /// When `timeout` elapses first, `PoolError::WaitTimeout` is returned and the pool
    /// keeps its workers: a later `wait` or `wait_async` still joins them and reports
    /// their exceptions.
    pub async fn wait_async(&mut self, timeout: Option<Duration>) -> Result<(), PoolError> {
        let poll_interval = self.ctx.timings.poll_interval;
        let running = &self.running;
        let all_returned = async {
            while !running.iter().all(WorkerHandle::is_finished) {
                tokio::time::sleep(poll_interval).await;
            }
        };

        match timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, all_returned).await.is_err() {
                    return Err(PoolError::WaitTimeout(self.name.clone()));
                }
            }
            None => all_returned.await,
        }

        // Every thread returned, so joining does not block.
        self.wait()
    }

    fn finish_wait(&mut self) -> Result<(), PoolError> {
        for handle in self.running.drain(..) {
            self.ctx.directory.unregister(handle.id());
        }

        let mut first = None;
        for shared in &self.history {
            let Some(captured) = shared.take_exception() else {
                continue;
            };
            if first.is_none() {
                first = Some(PoolError::Target {
                    worker: shared.id().clone(),
                    error: captured.error,
                    trace: captured.trace,
                });
            } else {
                warn!(pool = %self.name, worker = %shared.id(), error = %captured.error, "further worker exception");
            }
        }

        log_pool!(self.name.as_str(), "joined");
        match first {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Force-stop every worker, skipping the cooperative drain. Workers observe it
    /// within one poll interval; `wait` still joins them.
    pub fn terminate(&mut self) {
        for worker in self.created.drain(..) {
            self.ctx.directory.unregister(worker.id());
        }
        for handle in &self.running {
            handle.terminate();
        }
        info!(pool = %self.name, "pool terminated");
    }

    /// Enqueue a record on the input queue.
    pub fn add_to_input_queue(
        &self,
        record: I,
        origin: Option<WorkerId>,
        destination: Option<WorkerId>,
    ) -> Result<(), PoolError> {
        let origin = origin.unwrap_or_else(WorkerId::orchestrator);
        self.input
            .push(Message::new(origin, destination, Payload::Record(record)))?;
        Ok(())
    }

    /// Enqueue every record; returns how many were queued.
    pub fn add_all_to_input_queue<It>(&self, records: It) -> Result<usize, PoolError>
    where
        It: IntoIterator<Item = I>,
    {
        let mut queued = 0;
        for record in records {
            self.add_to_input_queue(record, None, None)?;
            queued += 1;
        }
        Ok(queued)
    }

    /// Broadcast a record to every output queue.
    pub fn add_to_output_queue(&self, record: O) -> Result<(), PoolError> {
        for queue in &self.outputs {
            queue.push_record(WorkerId::orchestrator(), record.clone())?;
        }
        Ok(())
    }

    pub fn add_all_to_output_queue<It>(&self, records: It) -> Result<usize, PoolError>
    where
        It: IntoIterator<Item = O>,
    {
        let mut queued = 0;
        for record in records {
            self.add_to_output_queue(record)?;
            queued += 1;
        }
        Ok(queued)
    }

    /// Started workers that have not exited yet.
    pub fn running_workers(&self) -> usize {
        self.running
            .iter()
            .filter(|handle| handle.state() != WorkerState::Exited)
            .count()
    }

    /// True once the pool was started and every one of its workers exited.
    pub fn is_finished(&self) -> bool {
        self.started && self.running_workers() == 0
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            name: self.name.clone(),
            max_workers: self.max_workers,
            running: self.running_workers(),
            processed: self.history.iter().map(|s| s.processed()).sum(),
            emitted: self.history.iter().map(|s| s.emitted()).sum(),
            skipped: self.history.iter().map(|s| s.skipped()).sum(),
            queue_len: self.input.len(),
        }
    }
}

impl<I, O> fmt::Debug for WorkerPool<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("max_workers", &self.max_workers)
            .field("created", &self.created.len())
            .field("running", &self.running.len())
            .field("started", &self.started)
            .field("daemon", &self.daemon)
            .finish()
    }
}

impl<I, O> Drop for WorkerPool<I, O> {
    fn drop(&mut self) {
        for worker in self.created.drain(..) {
            self.ctx.directory.unregister(worker.id());
        }
        if self.running.is_empty() {
            return;
        }

        if self.is_daemon() {
            for handle in &self.running {
                handle.terminate();
            }
            for handle in &mut self.running {
                handle.join();
                self.ctx.directory.unregister(handle.id());
            }
            debug!(pool = %self.name, "daemon workers joined on drop");
        } else {
            debug!(pool = %self.name, workers = self.running.len(), "detaching workers on drop");
        }
    }
}
