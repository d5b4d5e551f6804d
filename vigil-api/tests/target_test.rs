use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use vigil_api::{Target, TargetError, TargetFactory, TargetResult, WorkerId, Yield};

// A target keeping a per-worker resource across calls
struct SyntaxChecker {
    worker: WorkerId,
    checked: usize,
    teardowns: Arc<AtomicUsize>,
}

impl Target<String, (String, bool)> for SyntaxChecker {
    fn setup(&mut self) -> TargetResult<()> {
        if self.worker.as_str().is_empty() {
            return Err(TargetError::Failed("anonymous worker".to_string()));
        }
        Ok(())
    }

    fn process(&mut self, subject: String) -> TargetResult<Yield<(String, bool)>> {
        if subject.is_empty() {
            return Err(TargetError::InvalidInput("empty subject".to_string()));
        }
        self.checked += 1;
        let valid = subject.contains('.') && !subject.starts_with('.');
        Ok(Yield::One((subject, valid)))
    }

    fn teardown(&mut self) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_struct_target_lifecycle() {
    let teardowns = Arc::new(AtomicUsize::new(0));
    let mut checker = SyntaxChecker {
        worker: WorkerId::indexed("tester", 0),
        checked: 0,
        teardowns: Arc::clone(&teardowns),
    };

    checker.setup().unwrap();
    assert_eq!(
        checker.process("example.org".to_string()).unwrap(),
        Yield::One(("example.org".to_string(), true))
    );
    assert_eq!(
        checker.process(".invalid".to_string()).unwrap(),
        Yield::One((".invalid".to_string(), false))
    );
    assert!(matches!(
        checker.process(String::new()),
        Err(TargetError::InvalidInput(_))
    ));
    checker.teardown();

    assert_eq!(checker.checked, 2);
    assert_eq!(teardowns.load(Ordering::SeqCst), 1);
}

#[test]
fn test_factory_builds_one_target_per_worker() {
    let teardowns = Arc::new(AtomicUsize::new(0));
    let shared = Arc::clone(&teardowns);
    let factory = move |worker: &WorkerId| -> Box<dyn Target<String, (String, bool)>> {
        Box::new(SyntaxChecker {
            worker: worker.clone(),
            checked: 0,
            teardowns: Arc::clone(&shared),
        })
    };

    let mut first = factory.create(&WorkerId::indexed("tester", 0));
    let mut second = factory.create(&WorkerId::indexed("tester", 1));
    first.process("a.org".to_string()).unwrap();
    second.process("b.org".to_string()).unwrap();
    first.teardown();
    second.teardown();

    assert_eq!(teardowns.load(Ordering::SeqCst), 2);
}

#[test]
fn test_setup_failure_is_a_target_error() {
    let mut checker = SyntaxChecker {
        worker: WorkerId::new(""),
        checked: 0,
        teardowns: Arc::new(AtomicUsize::new(0)),
    };
    assert!(matches!(checker.setup(), Err(TargetError::Failed(_))));
}

#[test]
fn test_miner_emits_many() {
    let mut miner = |subject: String| -> TargetResult<Yield<String>> {
        Ok(Yield::Many(vec![format!("www.{subject}"), format!("mail.{subject}")]))
    };
    let produced = Target::<String, String>::process(&mut miner, "example.org".to_string()).unwrap();

    assert_eq!(produced.len(), 2);
    assert_eq!(
        produced.into_vec(),
        vec!["www.example.org".to_string(), "mail.example.org".to_string()]
    );
}

#[test]
fn test_yield_conversions() {
    assert_eq!(Yield::from(Some(1u8)), Yield::One(1));
    assert_eq!(Yield::<u8>::from(None), Yield::Nothing);
    assert_eq!(Yield::from(vec![1u8, 2]), Yield::Many(vec![1, 2]));
}
