// Vigil Testing Runtime
//
// Concurrent worker pools and the tester/miner/producer pipeline, running targets
// defined against `vigil-api` on dedicated OS threads.

pub mod logging;
pub mod thread;

// Re-export commonly used types
pub use thread::*;
pub use vigil_api;

// Used by the exported logging macros.
#[doc(hidden)]
pub use tracing;
