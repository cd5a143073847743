//! Error types for the serialq task queue.
//!
//! Outcomes are observed by several parties (the submitting caller, the drain
//! loop, and the successor task), so every variant is cheaply cloneable.

use thiserror::Error;

/// Default reason attached to a cancellation that carried none.
pub const DEFAULT_ABORT_REASON: &str = "aborted without reason";

/// The error half of a task outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task's cancellation scope was triggered.
    ///
    /// Raised both when a not-yet-started task is skipped and when a running
    /// task resolves after its scope fired.
    #[error("task cancelled: {reason}")]
    Cancelled {
        /// The reason carried by the cancellation signal.
        reason: String,
    },

    /// The task function returned an error.
    #[error("task failed: {0}")]
    Failed(String),

    /// The task function panicked; the panic was contained.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The settled value could not be downcast to the handle's result type.
    #[error("task outcome does not match the handle's result type")]
    OutcomeTypeMismatch,
}

impl TaskError {
    /// Builds a cancellation error from an optional signal reason.
    #[must_use]
    pub fn cancelled(reason: Option<String>) -> Self {
        Self::Cancelled {
            reason: reason.unwrap_or_else(|| DEFAULT_ABORT_REASON.to_string()),
        }
    }

    /// Returns whether this is a cancellation rejection.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        Self::Failed(message)
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        Self::Failed(message.to_string())
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(error: anyhow::Error) -> Self {
        Self::Failed(format!("{error:#}"))
    }
}
