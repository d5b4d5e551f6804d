//! # Queue Messages
//!
//! Every item travelling on a queue is wrapped in a [`Message`] envelope recording
//! which worker produced it and, optionally, which worker it is meant for.
//!
//! ## Core Components
//!
//! - `Signal`: the two control tokens understood by every worker
//! - `Payload`: either a control token or a domain record
//! - `Message`: the immutable envelope placed on shared queues
//! - `ControlMessage`: the record-free envelope delivered to a worker's own mailbox
//!
//! ## Usage Example
//!
//! ```rust
//! use vigil_api::message::{Message, Payload, Signal};
//! use vigil_api::WorkerId;
//!
//! let record = Message::record(WorkerId::orchestrator(), "example.org".to_string());
//! assert!(record.payload().is_record());
//!
//! let stop: Message<String> = Message::signal(WorkerId::orchestrator(), Signal::Stop)
//!     .with_destination(WorkerId::indexed("tester", 0));
//! assert!(stop.is_addressed_to(&WorkerId::indexed("tester", 0)));
//! assert!(!stop.is_addressed_to(&WorkerId::indexed("tester", 1)));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::WorkerId;

/// Control tokens exchanged between workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    /// Ask the receiving worker to leave its loop.
    Stop,
    /// Ask the receiving worker to hold on: a cyclic partner may still enqueue work.
    Wait,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Stop => f.write_str("stop"),
            Signal::Wait => f.write_str("wait"),
        }
    }
}

/// Content of a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Payload<T> {
    Control(Signal),
    Record(T),
}

impl<T> Payload<T> {
    pub fn is_record(&self) -> bool {
        matches!(self, Payload::Record(_))
    }

    pub fn signal(&self) -> Option<Signal> {
        match self {
            Payload::Control(signal) => Some(*signal),
            Payload::Record(_) => None,
        }
    }
}

/// Envelope carried on shared queues.
///
/// A message is never modified once built; routing a message elsewhere moves the
/// whole envelope unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message<T> {
    origin: WorkerId,
    destination: Option<WorkerId>,
    payload: Payload<T>,
}

impl<T> Message<T> {
    pub fn new(origin: WorkerId, destination: Option<WorkerId>, payload: Payload<T>) -> Self {
        Self {
            origin,
            destination,
            payload,
        }
    }

    /// Unaddressed record message.
    pub fn record(origin: WorkerId, record: T) -> Self {
        Self::new(origin, None, Payload::Record(record))
    }

    /// Unaddressed control message.
    pub fn signal(origin: WorkerId, signal: Signal) -> Self {
        Self::new(origin, None, Payload::Control(signal))
    }

    /// Builder-style destination, used before the message is enqueued.
    pub fn with_destination(mut self, destination: WorkerId) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn origin(&self) -> &WorkerId {
        &self.origin
    }

    pub fn destination(&self) -> Option<&WorkerId> {
        self.destination.as_ref()
    }

    pub fn payload(&self) -> &Payload<T> {
        &self.payload
    }

    pub fn into_payload(self) -> Payload<T> {
        self.payload
    }

    /// True when the message has no destination or names `worker`.
    pub fn is_addressed_to(&self, worker: &WorkerId) -> bool {
        self.destination.as_ref().map_or(true, |dest| dest == worker)
    }
}

/// Control token delivered straight to one worker's mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub origin: WorkerId,
    pub signal: Signal,
}

impl ControlMessage {
    pub fn new(origin: WorkerId, signal: Signal) -> Self {
        Self { origin, signal }
    }

    pub fn stop(origin: WorkerId) -> Self {
        Self::new(origin, Signal::Stop)
    }

    pub fn wait(origin: WorkerId) -> Self {
        Self::new(origin, Signal::Wait)
    }
}
