#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vigil::thread::config::WorkerTimings;
use vigil_api::{Target, TargetError, TargetResult, WorkerId, Yield};

/// Timings shrunk so drains finish in milliseconds.
pub fn fast_timings() -> WorkerTimings {
    WorkerTimings {
        poll_interval: Duration::from_millis(10),
        wait_backoff: Duration::from_millis(20),
        idle_window: Duration::from_millis(100),
    }
}

/// Counts calls per worker and per record.
#[derive(Debug, Default)]
pub struct CallLog {
    total: AtomicUsize,
    per_worker: Mutex<HashMap<WorkerId, usize>>,
    per_record: Mutex<HashMap<String, usize>>,
}

impl CallLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, worker: &WorkerId, key: impl ToString) {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self
            .per_worker
            .lock()
            .unwrap()
            .entry(worker.clone())
            .or_default() += 1;
        *self
            .per_record
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default() += 1;
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn workers(&self) -> usize {
        self.per_worker.lock().unwrap().len()
    }

    pub fn calls_by(&self, worker: &WorkerId) -> usize {
        self.per_worker
            .lock()
            .unwrap()
            .get(worker)
            .copied()
            .unwrap_or(0)
    }

    pub fn max_calls_per_record(&self) -> usize {
        self.per_record
            .lock()
            .unwrap()
            .values()
            .copied()
            .max()
            .unwrap_or(0)
    }

    pub fn distinct_records(&self) -> usize {
        self.per_record.lock().unwrap().len()
    }
}

/// `x -> x * 2`, logging every call.
pub fn doubler(log: Arc<CallLog>) -> impl Fn(&WorkerId) -> Box<dyn Target<u64, u64>> + Send + Sync {
    move |worker: &WorkerId| -> Box<dyn Target<u64, u64>> {
        let log = Arc::clone(&log);
        let worker = worker.clone();
        Box::new(move |x: u64| -> TargetResult<Yield<u64>> {
            log.record(&worker, x);
            Ok(Yield::One(x * 2))
        })
    }
}

/// Sleeps `delay` per record; fails on `poison`.
pub fn slow_target(
    log: Arc<CallLog>,
    delay: Duration,
    poison: Option<u64>,
) -> impl Fn(&WorkerId) -> Box<dyn Target<u64, u64>> + Send + Sync {
    move |worker: &WorkerId| -> Box<dyn Target<u64, u64>> {
        let log = Arc::clone(&log);
        let worker = worker.clone();
        Box::new(move |x: u64| -> TargetResult<Yield<u64>> {
            std::thread::sleep(delay);
            if Some(x) == poison {
                return Err(TargetError::Failed(format!("cannot check {x}")));
            }
            log.record(&worker, x);
            Ok(Yield::One(x))
        })
    }
}

/// Subject carried around the tester/miner cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub name: String,
    pub depth: u32,
}

impl Subject {
    pub fn seed(index: usize) -> Self {
        Self {
            name: format!("host{index}.example.org"),
            depth: 1,
        }
    }
}

/// Tester: reports every subject it sees.
pub fn tester(log: Arc<CallLog>) -> impl Fn(&WorkerId) -> Box<dyn Target<Subject, Subject>> + Send + Sync {
    move |worker: &WorkerId| -> Box<dyn Target<Subject, Subject>> {
        let log = Arc::clone(&log);
        let worker = worker.clone();
        Box::new(move |subject: Subject| -> TargetResult<Yield<Subject>> {
            log.record(&worker, format!("{}@{}", subject.name, subject.depth));
            Ok(Yield::One(subject))
        })
    }
}

/// Miner: yields one deeper subject until `max_depth`, then nothing.
pub fn miner(max_depth: u32) -> impl Fn(&WorkerId) -> Box<dyn Target<Subject, Subject>> + Send + Sync {
    move |_: &WorkerId| -> Box<dyn Target<Subject, Subject>> {
        Box::new(move |subject: Subject| -> TargetResult<Yield<Subject>> {
            if subject.depth >= max_depth {
                return Ok(Yield::Nothing);
            }
            Ok(Yield::One(Subject {
                name: subject.name,
                depth: subject.depth + 1,
            }))
        })
    }
}

/// Producer: counts what reaches the sink.
pub fn producer(log: Arc<CallLog>) -> impl Fn(&WorkerId) -> Box<dyn Target<Subject, ()>> + Send + Sync {
    move |worker: &WorkerId| -> Box<dyn Target<Subject, ()>> {
        let log = Arc::clone(&log);
        let worker = worker.clone();
        Box::new(move |subject: Subject| -> TargetResult<Yield<()>> {
            log.record(&worker, format!("{}@{}", subject.name, subject.depth));
            Ok(Yield::Nothing)
        })
    }
}
