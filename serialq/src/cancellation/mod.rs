//! Cooperative cancellation primitives.
//!
//! A [`CancellationToken`] is the group/unit signal the queue propagates;
//! a [`DisposalRegistry`] holds the cleanup hooks that run when an executor
//! is cleared.

mod disposal;
mod token;

pub use disposal::DisposalRegistry;
pub use token::{CancelListener, CancellationToken};
