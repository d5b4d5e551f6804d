//! # Worker Thread Module
//!
//! A worker is one OS thread running a control loop over a pluggable [`Target`].
//! It pulls messages from its pool's shared input queue and from its own control
//! mailbox, hands records to the target, and fans the target's output out to every
//! output queue.
//!
//! ## Key Concepts
//! - Lifecycle: `Created -> Running -> (Draining) -> Exited`, exactly once
//! - Isolation: a failing or panicking target stops only its own worker; the error is
//!   kept until the pool's `wait()` hands it to the caller
//! - Cooperative drain: in a feedback cycle a `stop` does not end the worker at once.
//!   It asks every worker of the cycle to hold on with `wait` tokens until the whole
//!   cycle has been unproductive for one idle window
//!
//! ## Exit Conditions
//! - Global exit event set, or the local exit flag set by [`WorkerHandle::terminate`]
//! - Budget exceeded without feedback
//! - `stop` without feedback, or `stop`/`wait` once the feedback cycle is quiescent
//! - Target error (captured) or broken input queue (global exit event set)

use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use flume::{Receiver, Sender};
use tracing::{debug, info, trace, warn};

use vigil_api::{ControlMessage, Message, Payload, Signal, Target, TargetError, WorkerId};

use crate::thread::budget::ExecutionBudget;
use crate::thread::config::WorkerTimings;
use crate::thread::error::{PoolError, QueueError};
use crate::thread::exit::GlobalExitEvent;
use crate::thread::mailbox::MailboxDirectory;
use crate::thread::queue::WorkQueue;
use crate::{log_error, log_lifecycle, worker_span};

/// States a worker can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Constructed, loop not entered yet
    Created = 0,
    /// Processing messages
    Running = 1,
    /// Budget exceeded in a feedback cycle: finishing in-flight work only
    Draining = 2,
    /// Loop returned
    Exited = 3,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Created,
            1 => WorkerState::Running,
            2 => WorkerState::Draining,
            _ => WorkerState::Exited,
        }
    }
}

/// Everything a worker shares with its pool. Cloned into each worker at construction.
#[derive(Clone)]
pub struct WorkerContext {
    pub exit_event: GlobalExitEvent,
    pub budget: Option<Arc<ExecutionBudget>>,
    pub directory: Arc<MailboxDirectory>,
    pub timings: WorkerTimings,
    /// Whether this worker takes part in a feedback cycle.
    pub feedback: bool,
    /// Pools notified with `wait` tokens during a cooperative drain.
    pub peers: Vec<String>,
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("feedback", &self.feedback)
            .field("peers", &self.peers)
            .field("timings", &self.timings)
            .finish()
    }
}

/// Error captured from a target, with the trace taken where it was caught.
#[derive(Debug)]
pub struct CapturedException {
    pub error: TargetError,
    pub trace: String,
}

impl CapturedException {
    fn new(error: TargetError) -> Self {
        Self {
            error,
            trace: Backtrace::force_capture().to_string(),
        }
    }
}

/// State a worker shares with whoever holds its handle.
pub struct WorkerShared {
    id: WorkerId,
    state: AtomicU8,
    exit_flag: AtomicBool,
    exception: Mutex<Option<CapturedException>>,
    mailbox: Sender<ControlMessage>,
    processed: AtomicU64,
    emitted: AtomicU64,
    skipped: AtomicU64,
}

impl WorkerShared {
    fn new(id: WorkerId, mailbox: Sender<ControlMessage>) -> Self {
        Self {
            id,
            state: AtomicU8::new(WorkerState::Created as u8),
            exit_flag: AtomicBool::new(false),
            exception: Mutex::new(None),
            mailbox,
            processed: AtomicU64::new(0),
            emitted: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn is_exited(&self) -> bool {
        self.state() == WorkerState::Exited
    }

    /// Sets the local exit flag and wakes the worker with a self-addressed `stop`.
    pub fn terminate(&self) {
        if !self.exit_flag.swap(true, Ordering::SeqCst) {
            let _ = self.mailbox.send(ControlMessage::stop(self.id.clone()));
        }
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_flag.load(Ordering::SeqCst)
    }

    /// Display form and trace of the captured exception, if any.
    pub fn exception(&self) -> Option<(String, String)> {
        self.exception
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|captured| (captured.error.to_string(), captured.trace.clone()))
    }

    pub fn has_exception(&self) -> bool {
        self.exception
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    // The slot is written once; later failures are only logged.
    fn capture(&self, captured: CapturedException) {
        let mut slot = self.exception.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(captured);
        } else {
            warn!(worker = %self.id, error = %captured.error, "exception slot already filled");
        }
    }

    pub(crate) fn take_exception(&self) -> Option<CapturedException> {
        self.exception.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for WorkerShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerShared")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("processed", &self.processed())
            .field("has_exception", &self.has_exception())
            .finish()
    }
}

/// Handle to a started worker thread.
pub struct WorkerHandle {
    shared: Arc<WorkerShared>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn id(&self) -> &WorkerId {
        self.shared.id()
    }

    pub fn shared(&self) -> &Arc<WorkerShared> {
        &self.shared
    }

    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    pub fn terminate(&self) {
        self.shared.terminate();
    }

    pub fn exception(&self) -> Option<(String, String)> {
        self.shared.exception()
    }

    /// True once the worker thread returned, or was already joined.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Blocks until the worker thread returned.
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                // Target panics are caught inside the loop; this is a loop bug.
                self.shared.capture(CapturedException::new(TargetError::Panicked(
                    format!("worker {} thread panicked outside its target", self.shared.id),
                )));
                self.shared.set_state(WorkerState::Exited);
            }
        }
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", self.id())
            .field("state", &self.state())
            .field("has_thread", &self.thread.is_some())
            .finish()
    }
}

enum Incoming<I> {
    Control(ControlMessage),
    Queue(Message<I>),
}

enum Flow {
    Continue,
    Exit,
}

enum Fault {
    Target(CapturedException),
    Queue(QueueError),
}

/// A worker: one input queue reference, any number of output queue references,
/// a control mailbox and a target.
pub struct Worker<I, O> {
    id: WorkerId,
    pool: String,
    input: Arc<WorkQueue<I>>,
    outputs: Vec<Arc<WorkQueue<O>>>,
    target: Box<dyn Target<I, O>>,
    mailbox: Receiver<ControlMessage>,
    shared: Arc<WorkerShared>,
    ctx: WorkerContext,
    wait_due: Option<Instant>,
}

impl<I, O> fmt::Debug for Worker<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("pool", &self.pool)
            .field("input", &self.input.name())
            .field("outputs", &self.outputs.len())
            .field("state", &self.shared.state())
            .finish()
    }
}

impl<I, O> Worker<I, O> {
    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    pub fn shared(&self) -> &Arc<WorkerShared> {
        &self.shared
    }
}

impl<I, O> Worker<I, O>
where
    I: Send + 'static,
    O: Clone + Send + 'static,
{
    /// Creates a worker. The mailbox pair usually comes from
    /// [`mailbox()`](crate::thread::mailbox::mailbox); the pool registers the sender
    /// in the directory.
    pub fn new(
        id: WorkerId,
        pool: impl Into<String>,
        input: Arc<WorkQueue<I>>,
        outputs: Vec<Arc<WorkQueue<O>>>,
        target: Box<dyn Target<I, O>>,
        mailbox: (Sender<ControlMessage>, Receiver<ControlMessage>),
        ctx: WorkerContext,
    ) -> Self {
        let (mailbox_tx, mailbox_rx) = mailbox;
        let shared = Arc::new(WorkerShared::new(id.clone(), mailbox_tx));
        Self {
            id,
            pool: pool.into(),
            input,
            outputs,
            target,
            mailbox: mailbox_rx,
            shared,
            ctx,
            wait_due: None,
        }
    }

    /// Starts the control loop on a dedicated thread named after the worker.
    pub fn spawn(self) -> Result<WorkerHandle, PoolError> {
        let shared = Arc::clone(&self.shared);
        let dispatcher = crate::logging::current_subscriber();
        let thread = std::thread::Builder::new()
            .name(self.id.to_string())
            .spawn(move || {
                tracing::dispatcher::with_default(&dispatcher, || self.start());
            })
            .map_err(|e| PoolError::Spawn(format!("{}: {e}", shared.id)))?;

        Ok(WorkerHandle {
            shared,
            thread: Some(thread),
        })
    }

    /// Runs the control loop on the calling thread; returns only once the worker exited.
    pub fn start(mut self) {
        let span = worker_span!(self.pool.as_str(), self.id.as_str());
        let _guard = span.enter();

        self.shared.set_state(WorkerState::Running);
        log_lifecycle!(self.pool.as_str(), self.id.as_str(), "started");

        match self.run_setup() {
            Ok(()) => self.control_loop(),
            Err(captured) => self.fail(captured),
        }

        if panic::catch_unwind(AssertUnwindSafe(|| self.target.teardown())).is_err() {
            warn!(worker = %self.id, "target teardown panicked");
        }

        self.shared.exit_flag.store(true, Ordering::SeqCst);
        self.shared.set_state(WorkerState::Exited);
        log_lifecycle!(
            self.pool.as_str(),
            self.id.as_str(),
            "exited",
            processed = self.shared.processed(),
            skipped = self.shared.skipped()
        );
    }

    /// Enqueues on this worker's input queue. `origin` defaults to this worker.
    pub fn add_to_input_queue(
        &self,
        payload: Payload<I>,
        origin: Option<WorkerId>,
        destination: Option<WorkerId>,
    ) -> Result<(), QueueError> {
        let origin = origin.unwrap_or_else(|| self.id.clone());
        self.input.push(Message::new(origin, destination, payload))
    }

    /// Broadcasts a record to every output queue.
    pub fn add_to_output_queue(&self, record: O) -> Result<(), QueueError> {
        if let Some((last, rest)) = self.outputs.split_last() {
            for queue in rest {
                queue.push_record(self.id.clone(), record.clone())?;
            }
            last.push_record(self.id.clone(), record)?;
        }
        Ok(())
    }

    fn run_setup(&mut self) -> Result<(), CapturedException> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.target.setup())) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(CapturedException::new(error)),
            Err(payload) => Err(CapturedException::new(TargetError::Panicked(
                panic_message(payload.as_ref()),
            ))),
        }
    }

    fn control_loop(&mut self) {
        loop {
            if self.ctx.exit_event.is_set() {
                debug!(worker = %self.id, "global exit event observed");
                break;
            }
            if self.shared.exit_requested() {
                debug!(worker = %self.id, "terminated");
                break;
            }
            if self.input.is_closed() {
                self.queue_fault(QueueError::Closed(self.input.name().to_string()));
                break;
            }

            if self.shared.state() == WorkerState::Running && self.budget_exceeded() {
                if !self.ctx.feedback {
                    info!(worker = %self.id, "execution budget exceeded; exiting");
                    break;
                }
                info!(worker = %self.id, "execution budget exceeded; draining");
                self.shared.set_state(WorkerState::Draining);
                self.share_wait();
            }

            self.flush_due_wait();

            let incoming = match self.next_incoming() {
                Ok(Some(incoming)) => incoming,
                Ok(None) => continue,
                Err(error) => {
                    self.queue_fault(error);
                    break;
                }
            };

            let flow = match incoming {
                Incoming::Control(message) => self.on_signal(message.signal, &message.origin),
                Incoming::Queue(message) => self.on_message(message),
            };

            if let Flow::Exit = flow {
                break;
            }
        }
    }

    /// Waits at most one poll interval, or until the pending self-wait is due.
    fn next_incoming(&self) -> Result<Option<Incoming<I>>, QueueError> {
        if let Ok(message) = self.mailbox.try_recv() {
            return Ok(Some(Incoming::Control(message)));
        }
        if let Some(message) = self.input.try_pop()? {
            return Ok(Some(Incoming::Queue(message)));
        }

        let mut timeout = self.ctx.timings.poll_interval;
        if let Some(due) = self.wait_due {
            timeout = timeout.min(due.saturating_duration_since(Instant::now()));
        }

        let selected = flume::Selector::new()
            .recv(&self.mailbox, |res| res.map(Incoming::Control).map_err(|_| None))
            .recv(self.input.receiver(), |res| {
                res.map(Incoming::Queue)
                    .map_err(|_| Some(QueueError::Disconnected(self.input.name().to_string())))
            })
            .wait_timeout(timeout);

        match selected {
            Ok(Ok(incoming)) => Ok(Some(incoming)),
            // Our own mailbox sender lives in `shared`, it cannot disconnect.
            Ok(Err(None)) => Ok(None),
            Ok(Err(Some(error))) => Err(error),
            Err(_timeout) => Ok(None),
        }
    }

    fn on_message(&mut self, message: Message<I>) -> Flow {
        if !message.is_addressed_to(&self.id) {
            return self.reroute(message);
        }

        let origin = message.origin().clone();
        match message.into_payload() {
            Payload::Control(signal) => self.on_signal(signal, &origin),
            Payload::Record(record) => self.on_record(record),
        }
    }

    fn on_signal(&mut self, signal: Signal, origin: &WorkerId) -> Flow {
        trace!(worker = %self.id, %signal, %origin, "control message");
        match signal {
            Signal::Stop => {
                if !self.ctx.feedback {
                    return Flow::Exit;
                }
                self.share_wait();
                if self.cycle_is_idle() {
                    Flow::Exit
                } else {
                    Flow::Continue
                }
            }
            Signal::Wait => {
                if !self.ctx.feedback {
                    return Flow::Continue;
                }
                if self.cycle_is_idle() {
                    return Flow::Exit;
                }
                if self.wait_due.is_none() {
                    self.wait_due = Some(Instant::now() + self.ctx.timings.wait_backoff);
                }
                Flow::Continue
            }
        }
    }

    fn on_record(&mut self, record: I) -> Flow {
        if self.shared.state() == WorkerState::Draining {
            self.shared.skipped.fetch_add(1, Ordering::Relaxed);
            self.input.tracker().record_done();
            return Flow::Continue;
        }

        let outcome = self.process_record(record);
        // Outputs are already queued, so the cycle never looks empty in between.
        self.input.tracker().record_done();

        match outcome {
            Ok(()) => Flow::Continue,
            Err(Fault::Target(captured)) => {
                self.fail(captured);
                Flow::Exit
            }
            Err(Fault::Queue(error)) => {
                self.queue_fault(error);
                Flow::Exit
            }
        }
    }

    fn process_record(&mut self, record: I) -> Result<(), Fault> {
        let produced = match panic::catch_unwind(AssertUnwindSafe(|| self.target.process(record))) {
            Ok(Ok(produced)) => produced,
            Ok(Err(error)) => return Err(Fault::Target(CapturedException::new(error))),
            Err(payload) => {
                return Err(Fault::Target(CapturedException::new(TargetError::Panicked(
                    panic_message(payload.as_ref()),
                ))))
            }
        };

        self.shared.processed.fetch_add(1, Ordering::Relaxed);
        if produced.is_empty() {
            return Ok(());
        }

        for item in produced.into_vec() {
            self.add_to_output_queue(item).map_err(Fault::Queue)?;
            self.shared.emitted.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    // A message meant for another worker. Control tokens go to its mailbox wherever
    // it lives. Records only go back on the shared queue when the addressee is a live
    // member of this pool; no other worker could ever take them off it.
    fn reroute(&mut self, message: Message<I>) -> Flow {
        let Some(destination) = message.destination().cloned() else {
            return Flow::Continue;
        };
        let origin = message.origin().clone();

        let record = match message.into_payload() {
            Payload::Control(signal) => {
                let control = ControlMessage::new(origin, signal);
                if !self.ctx.directory.deliver(&destination, control) {
                    debug!(worker = %self.id, %destination, %signal, "dropping token for a gone worker");
                }
                return Flow::Continue;
            }
            Payload::Record(record) => record,
        };

        if !self.ctx.directory.is_reachable(&self.pool, &destination) {
            debug!(worker = %self.id, %destination, "addressee not in this pool; processing here");
            return self.on_record(record);
        }

        trace!(worker = %self.id, %destination, "passing record through the shared queue");
        match self
            .input
            .push(Message::new(origin, Some(destination), Payload::Record(record)))
        {
            Ok(()) => {
                self.input.tracker().record_done();
                Flow::Continue
            }
            Err(error) => {
                self.queue_fault(error);
                Flow::Exit
            }
        }
    }

    /// Sends `wait` to this worker, its siblings and every peer pool.
    fn share_wait(&self) {
        let message = ControlMessage::wait(self.id.clone());
        let _ = self.shared.mailbox.send(message.clone());

        let mut reached = self
            .ctx
            .directory
            .broadcast(&self.pool, &message, Some(&self.id));
        for peer in &self.ctx.peers {
            reached += self.ctx.directory.broadcast(peer, &message, None);
        }
        debug!(worker = %self.id, reached, "shared wait with the feedback cycle");
    }

    fn flush_due_wait(&mut self) {
        if let Some(due) = self.wait_due {
            if Instant::now() >= due {
                self.wait_due = None;
                let _ = self.shared.mailbox.send(ControlMessage::wait(self.id.clone()));
            }
        }
    }

    fn cycle_is_idle(&self) -> bool {
        self.input
            .tracker()
            .is_quiescent(self.ctx.timings.idle_window)
    }

    fn budget_exceeded(&self) -> bool {
        self.ctx
            .budget
            .as_ref()
            .is_some_and(|budget| budget.is_time_exceeded())
    }

    fn fail(&mut self, captured: CapturedException) {
        log_error!(captured.error, worker = %self.id, "target raised; worker stopping");
        self.shared.capture(captured);
        self.shared.exit_flag.store(true, Ordering::SeqCst);
        if self.ctx.feedback {
            // Partners re-check the cycle instead of waiting on a stop that may never come.
            self.share_wait();
        }
    }

    fn queue_fault(&self, error: QueueError) {
        self.ctx
            .exit_event
            .set(format!("worker {} hit a queue fault: {error}", self.id));
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::config::WorkerTimings;
    use crate::thread::mailbox::mailbox;
    use std::time::Duration;
    use vigil_api::{TargetResult, Yield};

    fn context(feedback: bool) -> WorkerContext {
        WorkerContext {
            exit_event: GlobalExitEvent::new(),
            budget: None,
            directory: Arc::new(MailboxDirectory::new()),
            timings: WorkerTimings {
                poll_interval: Duration::from_millis(10),
                wait_backoff: Duration::from_millis(10),
                idle_window: Duration::from_millis(30),
            },
            feedback,
            peers: Vec::new(),
        }
    }

    fn doubling_worker(
        feedback: bool,
    ) -> (Worker<u32, u32>, Arc<WorkQueue<u32>>, Arc<WorkQueue<u32>>) {
        let input = WorkQueue::shared("in");
        let output = WorkQueue::shared("out");
        let target: Box<dyn Target<u32, u32>> =
            Box::new(|x: u32| -> TargetResult<Yield<u32>> { Ok(Yield::One(x * 2)) });
        let worker = Worker::new(
            WorkerId::indexed("unit", 0),
            "unit",
            Arc::clone(&input),
            vec![Arc::clone(&output)],
            target,
            mailbox(),
            context(feedback),
        );
        (worker, input, output)
    }

    #[test]
    fn processes_until_stop_without_feedback() {
        let (worker, input, output) = doubling_worker(false);
        for value in 1..=3 {
            input.push_record(WorkerId::orchestrator(), value).unwrap();
        }
        input
            .push_signal(WorkerId::orchestrator(), Signal::Stop, None)
            .unwrap();

        let shared = Arc::clone(worker.shared());
        worker.start();

        assert_eq!(shared.state(), WorkerState::Exited);
        assert_eq!(shared.processed(), 3);
        assert_eq!(output.len(), 3);
        assert_eq!(input.tracker().outstanding(), 0);
    }

    #[test]
    fn wait_is_ignored_without_feedback() {
        let (worker, input, _output) = doubling_worker(false);
        input
            .push_signal(WorkerId::orchestrator(), Signal::Wait, None)
            .unwrap();
        input.push_record(WorkerId::orchestrator(), 1).unwrap();
        input
            .push_signal(WorkerId::orchestrator(), Signal::Stop, None)
            .unwrap();

        let shared = Arc::clone(worker.shared());
        worker.start();
        assert_eq!(shared.processed(), 1);
    }

    #[test]
    fn stop_with_feedback_holds_until_idle() {
        let (worker, input, _output) = doubling_worker(true);
        input
            .push_signal(WorkerId::orchestrator(), Signal::Stop, None)
            .unwrap();
        input.push_record(WorkerId::orchestrator(), 5).unwrap();

        let shared = Arc::clone(worker.shared());
        let started = Instant::now();
        worker.start();

        // The record behind the stop is still consumed.
        assert_eq!(shared.processed(), 1);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "Unknown panic");
    }
}
