//! Cancellation-aware settlement bridge for a single task outcome.

use crate::cancellation::CancellationToken;
use crate::errors::TaskError;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::Notify;

/// A type-erased settled value, cloneable across observers.
pub type ErasedValue = Arc<dyn Any + Send + Sync>;

/// The settled outcome of one task: its erased value or its failure.
pub type TaskOutcome = Result<ErasedValue, TaskError>;

/// A settle-exactly-once outcome slot with any number of observers.
///
/// The submitting caller, the drain loop, and the successor task may all
/// await the same cell; every observer sees the same outcome.
pub struct OutcomeCell {
    state: Mutex<Option<TaskOutcome>>,
    settled: Notify,
}

impl OutcomeCell {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(None),
            settled: Notify::new(),
        })
    }

    /// Settles the cell. Only the first settlement takes effect.
    pub(crate) fn settle(&self, outcome: TaskOutcome) -> bool {
        {
            let mut state = self.state.lock();
            if state.is_some() {
                return false;
            }
            *state = Some(outcome);
        }
        self.settled.notify_waiters();
        true
    }

    /// Waits until the cell settles and returns the outcome.
    pub async fn wait(&self) -> TaskOutcome {
        loop {
            // Register interest before checking, so a settle between the
            // check and the await cannot be missed.
            let notified = self.settled.notified();
            if let Some(outcome) = self.state.lock().clone() {
                return outcome;
            }
            notified.await;
        }
    }

    /// Returns the outcome if the cell has settled.
    pub fn get(&self) -> Option<TaskOutcome> {
        self.state.lock().clone()
    }

    /// Returns whether the cell has settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.state.lock().is_some()
    }
}

impl std::fmt::Debug for OutcomeCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeCell")
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// Binds an [`OutcomeCell`] to a cancellation token.
///
/// Resolution and cancellation are mutually exclusive once the token fires:
/// a resolve after the fact is converted into a cancellation rejection, so a
/// caller never observes a "successful" result for cancelled work.
pub(crate) struct Defer {
    cell: Arc<OutcomeCell>,
    signal: Arc<CancellationToken>,
}

impl Defer {
    pub(crate) fn new(signal: Arc<CancellationToken>) -> Self {
        Self { cell: OutcomeCell::new(), signal }
    }

    pub(crate) fn cell(&self) -> Arc<OutcomeCell> {
        self.cell.clone()
    }

    /// Resolves with `value`, unless the bound token has already fired, in
    /// which case the outcome is a cancellation rejection carrying the
    /// token's reason (or the default reason).
    pub(crate) fn resolve(&self, value: ErasedValue) {
        if self.signal.is_cancelled() {
            self.cell.settle(Err(TaskError::cancelled(self.signal.reason())));
        } else {
            self.cell.settle(Ok(value));
        }
    }

    /// Rejects unconditionally, regardless of the token's state.
    pub(crate) fn reject(&self, error: TaskError) {
        self.cell.settle(Err(error));
    }
}
