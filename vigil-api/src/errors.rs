//! # Target Error Types
//!
//! Errors raised by a [`Target`](crate::target::Target). A target error is isolated
//! to the worker that raised it: the worker captures it, stops, and the owning pool
//! hands it back to the caller from `wait()`. Sibling workers keep running.
//!
//! ## Usage Example
//!
//! ```rust
//! use vigil_api::errors::TargetError;
//!
//! fn check(subject: &str) -> Result<(), TargetError> {
//!     if subject.is_empty() {
//!         return Err(TargetError::InvalidInput("empty subject".to_string()));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check("").is_err());
//! ```

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TargetError {
    /// The target could not complete its work on a record.
    #[error("Target failed: {0}")]
    Failed(String),

    /// The record handed to the target is unusable.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A blocking call inside the target ran out of time.
    #[error("Target timed out after {0:?}")]
    Timeout(Duration),

    /// The target panicked; the payload message is kept.
    #[error("Target panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
