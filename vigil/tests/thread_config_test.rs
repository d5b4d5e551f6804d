// Integration tests for config types in vigil::thread::config

use std::time::Duration;

use vigil::thread::config::*;

#[test]
fn test_worker_timings_defaults() {
    let timings = WorkerTimings::default();

    assert_eq!(timings.poll_interval, Duration::from_millis(100));
    assert_eq!(timings.wait_backoff, Duration::from_secs(2));
    assert_eq!(timings.idle_window, Duration::from_secs(10));
}

#[test]
fn test_pipeline_config_defaults() {
    let config = PipelineConfig::default();

    assert!(config.max_workers.is_none());
    assert!(config.mining);
    assert!(config.daemon);
    assert!(config.ci.is_none());
    assert_eq!(config.effective_max_workers(), default_max_workers());
}

#[test]
fn test_default_max_workers_floor() {
    let expected = num_cpus::get().saturating_sub(2).max(1);
    assert_eq!(default_max_workers(), expected);
}

#[test]
fn test_explicit_max_workers_wins() {
    let config = PipelineConfig {
        max_workers: Some(7),
        ..Default::default()
    };
    assert_eq!(config.effective_max_workers(), 7);
}

#[test]
fn test_snapshot_roundtrip_keeps_every_field() {
    let config = PipelineConfig {
        max_workers: Some(4),
        mining: false,
        timings: WorkerTimings {
            poll_interval: Duration::from_millis(25),
            wait_backoff: Duration::from_millis(500),
            idle_window: Duration::from_secs(3),
        },
        ci: Some(CiConfig {
            max_exec_minutes: 42,
        }),
        daemon: false,
    };

    let snapshot = config.snapshot().unwrap();
    assert_eq!(PipelineConfig::from_snapshot(&snapshot).unwrap(), config);
}

#[test]
fn test_bad_snapshot_is_rejected() {
    assert!(PipelineConfig::from_snapshot("{\"max_workers\": \"many\"}").is_err());
}

#[test]
fn test_config_debug_format() {
    let config = PipelineConfig::default();
    assert!(format!("{:?}", config).contains("max_workers"));
    assert!(format!("{:?}", config.timings).contains("idle_window"));
}
