//! The sequential task executor.
//!
//! [`QueuedExecutor`] holds the FIFO backlog and the single-flight drain
//! loop; each submission becomes an execution unit with its own cancellation
//! scope and a [`TaskHandle`] settle-handle for the caller.

mod defer;
mod execution;
mod queue;

pub use defer::{ErasedValue, OutcomeCell, TaskOutcome};
pub use execution::TaskContext;
pub use queue::{QueuedExecutor, TaskHandle};
