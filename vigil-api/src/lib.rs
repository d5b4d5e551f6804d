//! # Vigil API
//!
//! Runtime-independent building blocks for the vigil test-orchestration pipeline.
//!
//! A pipeline is a small graph of worker pools. Each worker pulls [`Message`]s from a
//! shared input queue, hands every record to a pluggable [`Target`] and fans the
//! target's output out to the pool's output queues. This crate holds the pieces that
//! every runtime agrees on:
//!
//! - [`message`]: the envelope carried on queues and the control tokens
//! - [`target`]: the per-record processing extension point and its factory
//! - [`errors`]: the error raised by targets
//! - [`types`]: identifiers and result aliases
//!
//! ## Usage Example
//!
//! ```rust
//! use vigil_api::{Target, TargetResult, Yield};
//!
//! struct Doubler;
//!
//! impl Target<u64, u64> for Doubler {
//!     fn process(&mut self, input: u64) -> TargetResult<Yield<u64>> {
//!         Ok(Yield::One(input * 2))
//!     }
//! }
//!
//! let mut target = Doubler;
//! assert_eq!(target.process(21).unwrap().into_vec(), vec![42]);
//! ```

pub mod errors;
pub mod message;
pub mod target;
pub mod types;

pub use errors::TargetError;
pub use message::{ControlMessage, Message, Payload, Signal};
pub use target::{Target, TargetFactory, Yield};
pub use types::{TargetResult, WorkerId};
