// Logging for Vigil
//
// A thin layer over the `tracing` ecosystem. Every pool, worker and pipeline run
// emits structured events; this module decides where they go.
//
// # Usage Examples
//
// ## Basic Initialization
//
// ```rust
// use vigil::logging;
//
// // INFO level, console output
// logging::init_default();
//
// // Or a custom configuration
// let config = logging::LogConfig {
//     level: tracing::Level::DEBUG,
//     json_format: false,
//     ..Default::default()
// };
// logging::init(config);
// ```
//
// ## File Logging
//
// ```rust
// use vigil::logging;
//
// logging::init_with_file(logging::LogConfig::default(), "/var/log/vigil/run.log").unwrap();
// ```
//
// ## Worker Spans
//
// ```rust
// let span = vigil::worker_span!("tester", "tester-0");
// let _guard = span.enter();
// vigil::log_lifecycle!("tester", "tester-0", "started");
// ```

use std::io;
use std::sync::Once;

use tracing::{Level, Subscriber};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Configuration for the logging system.
///
/// # Examples
///
/// ```rust
/// use vigil::logging::LogConfig;
/// use tracing::Level;
///
/// let config = LogConfig {
///     level: Level::DEBUG,
///     json_format: true,
///     show_file_line: false,
///     show_thread_info: true,
///     show_time: true,
///     target_filters: Some("vigil=debug,vigil::thread::worker=trace".to_string()),
/// };
/// ```
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: Level,
    /// Whether to use JSON format for logs
    pub json_format: bool,
    /// Whether to include file and line information
    pub show_file_line: bool,
    /// Whether to include thread name/id; worker threads are named `<pool>-<index>`
    pub show_thread_info: bool,
    /// Whether to include timestamps
    pub show_time: bool,
    /// Target filter expressions (format: "target=level,target2=level2,...")
    pub target_filters: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            show_file_line: true,
            show_thread_info: true,
            show_time: true,
            target_filters: None,
        }
    }
}

static INIT: Once = Once::new();

fn env_filter(config: &LogConfig) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env().add_directive(config.level.into());
    if let Some(filters) = &config.target_filters {
        for directive in filters.split(',') {
            if let Ok(directive) = directive.trim().parse() {
                filter = filter.add_directive(directive);
            }
        }
    }
    filter
}

/// Initialize the global subscriber. Only the first call of any `init*` function
/// takes effect.
pub fn init(config: LogConfig) {
    INIT.call_once(|| {
        let registry = tracing_subscriber::registry().with(env_filter(&config));

        let subscriber: Box<dyn Subscriber + Send + Sync> = if config.json_format {
            Box::new(
                registry.with(
                    fmt::layer()
                        .json()
                        .flatten_event(true)
                        .with_thread_names(config.show_thread_info),
                ),
            )
        } else if config.show_time {
            Box::new(registry.with(console_layer(&config)))
        } else {
            Box::new(registry.with(console_layer(&config).without_time()))
        };

        set_global_subscriber(subscriber);
    });
}

fn console_layer<S>(config: &LogConfig) -> fmt::Layer<S>
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_ansi(atty::is(atty::Stream::Stdout))
        .with_file(config.show_file_line)
        .with_line_number(config.show_file_line)
        .with_thread_names(config.show_thread_info)
        .with_thread_ids(config.show_thread_info)
}

fn set_global_subscriber<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error setting global tracing subscriber: {}", err);
    }
}

/// Opens `path` in append mode, creating it if needed.
pub fn file_writer(path: &str) -> io::Result<Box<dyn io::Write + Send + Sync + 'static>> {
    use std::fs::OpenOptions;

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Box::new(file))
}

/// Initialize logging to the console and to `log_file`.
///
/// The file is opened up front so a bad path is reported to the caller; file output
/// never carries ANSI colors.
pub fn init_with_file(config: LogConfig, log_file: &str) -> Result<(), io::Error> {
    file_writer(log_file)?;

    INIT.call_once(|| {
        let log_file_path = log_file.to_string();
        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(move || match file_writer(&log_file_path) {
                Ok(writer) => writer,
                Err(_) => Box::new(io::stderr()),
            })
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true)
            .with_thread_ids(true);

        let subscriber = tracing_subscriber::registry()
            .with(env_filter(&config))
            .with(console_layer(&config))
            .with(file_layer);

        set_global_subscriber(subscriber);
    });

    Ok(())
}

/// INFO level, human-readable console output.
pub fn init_default() {
    init(LogConfig::default());
}

/// DEBUG for the crate, TRACE for the worker control loop, file/line shown.
pub fn init_development() {
    init(LogConfig {
        level: Level::DEBUG,
        json_format: false,
        show_file_line: true,
        show_thread_info: true,
        show_time: true,
        target_filters: Some("vigil=debug,vigil::thread::worker=trace".to_string()),
    });
}

/// JSON output for log aggregators, no file/line information.
pub fn init_production() {
    init(LogConfig {
        level: Level::INFO,
        json_format: true,
        show_file_line: false,
        show_thread_info: true,
        show_time: true,
        target_filters: None,
    });
}

/// WARN and above only, to keep test output readable.
///
/// ```rust
/// #[test]
/// fn my_test() {
///     vigil::logging::init_test();
/// }
/// ```
pub fn init_test() {
    init(LogConfig {
        level: Level::WARN,
        json_format: false,
        show_file_line: true,
        show_thread_info: false,
        show_time: false,
        target_filters: None,
    });
}

/// Span covering one worker's whole life.
///
/// ```rust
/// let span = vigil::worker_span!("miner", "miner-2");
/// let _guard = span.enter();
///
/// let span = vigil::worker_span!("tester", "tester-0", feedback = true);
/// ```
#[macro_export]
macro_rules! worker_span {
    ($pool:expr, $worker:expr) => {
        $crate::tracing::info_span!("worker", pool = $pool, id = $worker)
    };
    ($pool:expr, $worker:expr, $($fields:tt)*) => {
        $crate::tracing::info_span!("worker", pool = $pool, id = $worker, $($fields)*)
    };
}

/// Span covering one pipeline run.
#[macro_export]
macro_rules! run_span {
    ($run_id:expr) => {
        $crate::tracing::info_span!("run", run_id = %$run_id)
    };
    ($run_id:expr, $($fields:tt)*) => {
        $crate::tracing::info_span!("run", run_id = %$run_id, $($fields)*)
    };
}

/// Worker lifecycle events: started, draining, exited.
///
/// ```rust
/// vigil::log_lifecycle!("producer", "producer-0", "exited", processed = 12u64);
/// ```
#[macro_export]
macro_rules! log_lifecycle {
    ($pool:expr, $worker:expr, $event:expr) => {
        $crate::tracing::info!(pool = $pool, worker = $worker, event = $event)
    };
    ($pool:expr, $worker:expr, $event:expr, $($fields:tt)*) => {
        $crate::tracing::info!(pool = $pool, worker = $worker, event = $event, $($fields)*)
    };
}

/// Pool-level events: created, started, stop signalled, joined.
#[macro_export]
macro_rules! log_pool {
    ($pool:expr, $event:expr) => {
        $crate::tracing::debug!(pool = $pool, event = $event)
    };
    ($pool:expr, $event:expr, $($fields:tt)*) => {
        $crate::tracing::debug!(pool = $pool, event = $event, $($fields)*)
    };
}

/// Error events with a displayable error.
///
/// ```rust
/// let error = vigil_api::TargetError::Failed("dns lookup".into());
/// vigil::log_error!(error, worker = "tester-1");
/// ```
#[macro_export]
macro_rules! log_error {
    ($error:expr) => {
        $crate::tracing::error!(error = %$error)
    };
    ($error:expr, $($fields:tt)*) => {
        $crate::tracing::error!(error = %$error, $($fields)*)
    };
}

/// The dispatcher active on the calling thread.
///
/// Worker threads install it so their events reach the same subscriber as the thread
/// that spawned them, including thread-local test subscribers.
#[inline]
pub fn current_subscriber() -> tracing::Dispatch {
    tracing::dispatcher::get_default(|d| d.clone())
}

pub use tracing::{debug, error, info, trace, warn};
