//! # Control Mailboxes
//!
//! Shared queues are load-balanced, so a control token pushed on one reaches an
//! arbitrary worker. Tokens that must reach a particular worker go to that worker's
//! own mailbox instead. The [`MailboxDirectory`] maps pool names to the mailboxes of
//! their workers and is shared by every pool of a pipeline, which lets a worker
//! notify the workers of another pool whatever record type that pool consumes.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use flume::{Receiver, Sender};
use tracing::trace;

use vigil_api::{ControlMessage, WorkerId};

/// Creates the sending and receiving halves of one worker mailbox.
pub fn mailbox() -> (Sender<ControlMessage>, Receiver<ControlMessage>) {
    flume::unbounded()
}

/// Registry of worker mailboxes, grouped by pool name.
#[derive(Default)]
pub struct MailboxDirectory {
    pools: RwLock<HashMap<String, Vec<(WorkerId, Sender<ControlMessage>)>>>,
}

impl MailboxDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, pool: &str, worker: WorkerId, sender: Sender<ControlMessage>) {
        let mut pools = self.pools.write().unwrap_or_else(|e| e.into_inner());
        let members = pools.entry(pool.to_string()).or_default();
        members.retain(|(id, _)| id != &worker);
        members.push((worker, sender));
    }

    pub fn unregister(&self, worker: &WorkerId) {
        let mut pools = self.pools.write().unwrap_or_else(|e| e.into_inner());
        for members in pools.values_mut() {
            members.retain(|(id, _)| id != worker);
        }
    }

    /// Delivers `message` to one worker. Returns false when the worker is unknown or
    /// its mailbox is gone.
    pub fn deliver(&self, worker: &WorkerId, message: ControlMessage) -> bool {
        let pools = self.pools.read().unwrap_or_else(|e| e.into_inner());
        pools
            .values()
            .flat_map(|members| members.iter())
            .find(|(id, _)| id == worker)
            .is_some_and(|(_, sender)| sender.send(message).is_ok())
    }

    /// Delivers `message` to every worker of `pool` except `skip`. Returns the number
    /// of mailboxes reached.
    pub fn broadcast(&self, pool: &str, message: &ControlMessage, skip: Option<&WorkerId>) -> usize {
        let pools = self.pools.read().unwrap_or_else(|e| e.into_inner());
        let Some(members) = pools.get(pool) else {
            trace!(pool, "broadcast to unknown pool");
            return 0;
        };

        let mut reached = 0;
        for (id, sender) in members {
            if Some(id) != skip && sender.send(message.clone()).is_ok() {
                reached += 1;
            }
        }
        reached
    }

    /// True when `worker` is registered under `pool` and its mailbox is still read.
    pub fn is_reachable(&self, pool: &str, worker: &WorkerId) -> bool {
        let pools = self.pools.read().unwrap_or_else(|e| e.into_inner());
        pools.get(pool).is_some_and(|members| {
            members
                .iter()
                .any(|(id, sender)| id == worker && !sender.is_disconnected())
        })
    }
}

impl fmt::Debug for MailboxDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pools = self.pools.read().unwrap_or_else(|e| e.into_inner());
        let sizes: HashMap<&str, usize> = pools
            .iter()
            .map(|(name, members)| (name.as_str(), members.len()))
            .collect();
        f.debug_struct("MailboxDirectory").field("pools", &sizes).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_api::Signal;

    #[test]
    fn broadcast_skips_the_sender() {
        let directory = MailboxDirectory::new();
        let (tx0, rx0) = mailbox();
        let (tx1, rx1) = mailbox();
        let first = WorkerId::indexed("tester", 0);
        directory.register("tester", first.clone(), tx0);
        directory.register("tester", WorkerId::indexed("tester", 1), tx1);

        let reached = directory.broadcast("tester", &ControlMessage::wait(first.clone()), Some(&first));

        assert_eq!(reached, 1);
        assert!(rx0.try_recv().is_err());
        assert_eq!(rx1.try_recv().unwrap().signal, Signal::Wait);
    }

    #[test]
    fn dropped_mailbox_is_unreachable() {
        let directory = MailboxDirectory::new();
        let (tx, rx) = mailbox();
        let worker = WorkerId::indexed("miner", 0);
        directory.register("miner", worker.clone(), tx);
        assert!(directory.is_reachable("miner", &worker));
        assert!(!directory.is_reachable("tester", &worker));

        drop(rx);
        assert!(!directory.is_reachable("miner", &worker));
        assert!(!directory.deliver(&worker, ControlMessage::wait(WorkerId::orchestrator())));
    }

    #[test]
    fn deliver_to_unknown_worker_fails() {
        let directory = MailboxDirectory::new();
        assert!(!directory.deliver(
            &WorkerId::indexed("miner", 9),
            ControlMessage::stop(WorkerId::orchestrator())
        ));
    }
}
