use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flume::{Receiver, Sender};
use tracing::warn;

use vigil_api::{Message, Payload, Signal, WorkerId};

use crate::thread::activity::ActivityTracker;
use crate::thread::error::QueueError;

/// Shared, load-balanced queue feeding one pool.
///
/// Every worker of the pool pulls from the same receiver, so a message is handed to
/// exactly one of them. Workers and adjacent pools only hold `Arc` references; the
/// queue outlives all of them.
///
/// # Thread Safety
/// - Backed by an unbounded `flume` channel, safe for any number of producers and consumers
/// - Record pushes are counted on the attached [`ActivityTracker`]
/// - `close()` marks the queue broken; consumers treat that as an infrastructure fault
pub struct WorkQueue<T> {
    name: String,
    sender: Sender<Message<T>>,
    receiver: Receiver<Message<T>>,
    tracker: Arc<ActivityTracker>,
    closed: AtomicBool,
}

impl<T> WorkQueue<T> {
    /// Creates a queue with its own activity tracker.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_tracker(name, Arc::new(ActivityTracker::new()))
    }

    /// Creates a queue sharing `tracker` with the other queues of a feedback group.
    pub fn with_tracker(name: impl Into<String>, tracker: Arc<ActivityTracker>) -> Self {
        let (sender, receiver) = flume::unbounded();
        Self {
            name: name.into(),
            sender,
            receiver,
            tracker,
            closed: AtomicBool::new(false),
        }
    }

    /// Shorthand for `Arc::new(WorkQueue::new(name))`.
    pub fn shared(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tracker(&self) -> &Arc<ActivityTracker> {
        &self.tracker
    }

    /// Enqueues a message.
    pub fn push(&self, message: Message<T>) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed(self.name.clone()));
        }

        let is_record = message.payload().is_record();
        if is_record {
            self.tracker.record_enqueued();
        }

        self.sender.send(message).map_err(|_| {
            if is_record {
                self.tracker.record_done();
            }
            QueueError::Disconnected(self.name.clone())
        })
    }

    pub fn push_record(&self, origin: WorkerId, record: T) -> Result<(), QueueError> {
        self.push(Message::record(origin, record))
    }

    pub fn push_signal(
        &self,
        origin: WorkerId,
        signal: Signal,
        destination: Option<WorkerId>,
    ) -> Result<(), QueueError> {
        self.push(Message::new(origin, destination, Payload::Control(signal)))
    }

    /// Takes a message if one is ready.
    pub fn try_pop(&self) -> Result<Option<Message<T>>, QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed(self.name.clone()));
        }
        match self.receiver.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(flume::TryRecvError::Empty) => Ok(None),
            Err(flume::TryRecvError::Disconnected) => {
                Err(QueueError::Disconnected(self.name.clone()))
            }
        }
    }

    /// Marks the queue as broken. Every consumer will report a fault.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            warn!(queue = %self.name, "queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of queued messages, control tokens included (snapshot).
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub(crate) fn receiver(&self) -> &Receiver<Message<T>> {
        &self.receiver
    }
}

impl<T> fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_tracked_and_signals_are_not() {
        let queue: WorkQueue<u32> = WorkQueue::new("tester-input");
        queue.push_record(WorkerId::orchestrator(), 1).unwrap();
        queue
            .push_signal(WorkerId::orchestrator(), Signal::Stop, None)
            .unwrap();

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.tracker().outstanding(), 1);
    }

    #[test]
    fn fifo_on_single_consumer() {
        let queue: WorkQueue<u32> = WorkQueue::new("fifo");
        for value in 0..5 {
            queue.push_record(WorkerId::orchestrator(), value).unwrap();
        }
        let drained: Vec<u32> = std::iter::from_fn(|| queue.try_pop().unwrap())
            .filter_map(|msg| match msg.into_payload() {
                Payload::Record(value) => Some(value),
                Payload::Control(_) => None,
            })
            .collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn closed_queue_rejects_push_and_pop() {
        let queue: WorkQueue<u32> = WorkQueue::new("broken");
        queue.close();
        assert_eq!(
            queue.push_record(WorkerId::orchestrator(), 1),
            Err(QueueError::Closed("broken".to_string()))
        );
        assert!(queue.try_pop().is_err());
    }
}
