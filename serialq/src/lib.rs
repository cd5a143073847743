//! # Serialq
//!
//! A single-consumer task queue with strict sequential execution and
//! cooperative cancellation.
//!
//! Serialq guarantees that submitted tasks run strictly one at a time, in
//! submission order, with support for:
//!
//! - **FIFO execution**: one task body in flight at any moment, no reordering
//! - **Cancellation**: per-task and group-wide, effective even for tasks that
//!   have not started; running tasks are signalled, never force-terminated
//! - **Outcome chaining**: each task can inspect the settled outcome of its
//!   nearest non-cancelled predecessor
//! - **Failure isolation**: a failed task rejects its own handle and never
//!   halts the queue
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use serialq::prelude::*;
//!
//! let queue = QueuedExecutor::new();
//!
//! let handle = queue.exec(
//!     |ctx: TaskContext<u32>| async move {
//!         if ctx.signal.is_cancelled() {
//!             return Err(TaskError::cancelled(ctx.signal.reason()));
//!         }
//!         Ok(ctx.args * 2)
//!     },
//!     21,
//! );
//!
//! assert_eq!(*handle.outcome().await?, 42);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod errors;
pub mod executor;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{CancellationToken, DisposalRegistry};
    pub use crate::errors::{TaskError, DEFAULT_ABORT_REASON};
    pub use crate::executor::{
        QueuedExecutor, TaskContext, TaskHandle, TaskOutcome,
    };
}

#[cfg(test)]
mod tests {
    use crate::errors::TaskError;
    use crate::executor::{QueuedExecutor, TaskContext};

    #[test]
    fn prelude_surface_is_usable() {
        tokio_test::block_on(async {
            let queue = QueuedExecutor::new();
            let handle = queue.exec(
                |ctx: TaskContext<u32>| async move { Ok::<u32, TaskError>(ctx.args * 2) },
                21,
            );
            assert_eq!(handle.outcome().await.map(|v| *v), Ok(42));
        });
    }
}
