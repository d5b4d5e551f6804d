// Integration tests for the execution budget and the global exit event

use std::time::Duration;

use vigil::thread::budget::ExecutionBudget;
use vigil::thread::config::CiConfig;
use vigil::thread::exit::GlobalExitEvent;

#[test]
fn test_zero_budget_exceeded_immediately() {
    let budget = ExecutionBudget::new(Duration::ZERO, true);
    budget.set_start_time();

    assert!(budget.is_authorized());
    assert!(budget.is_time_exceeded());
}

#[test]
fn test_budget_from_ci_config() {
    let budget = ExecutionBudget::from_ci(Some(&CiConfig::default()));
    assert!(budget.is_authorized());
    assert_eq!(budget.max_exec(), Duration::from_secs(15 * 60));

    budget.set_start_time();
    assert!(!budget.is_time_exceeded());
    let remaining = budget.remaining().unwrap();
    assert!(remaining > Duration::from_secs(14 * 60));
    assert!(remaining <= Duration::from_secs(15 * 60));
}

#[test]
fn test_interactive_run_has_no_deadline() {
    let budget = ExecutionBudget::from_ci(None);
    assert!(!budget.is_authorized());

    budget.set_start_time();
    assert!(budget.start_time().is_some());
    assert!(!budget.is_time_exceeded());
    assert!(budget.remaining().is_none());
}

#[test]
fn test_deadline_follows_start_time() {
    let budget = ExecutionBudget::new(Duration::from_millis(30), true);
    budget.set_start_time();

    let start = budget.start_time().unwrap();
    assert_eq!(budget.deadline().unwrap() - start, Duration::from_millis(30));
    assert!(!budget.is_time_exceeded());

    std::thread::sleep(Duration::from_millis(40));
    assert!(budget.is_time_exceeded());
}

#[test]
fn test_exit_event_is_shared_between_clones() {
    let event = GlobalExitEvent::new();
    let seen_by_worker = event.clone();
    assert!(!seen_by_worker.is_set());

    event.set("queue tester-input is closed");
    event.set("second reason");

    assert!(seen_by_worker.is_set());
    assert_eq!(seen_by_worker.reason(), Some("queue tester-input is closed"));
}
